use crate::{DeviceFeature, DeviceProperties, PrimitiveError};
use core::fmt::Display;
use serde::{Deserialize, Serialize};

/// Scalar element types understood by the primitives.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BaseType {
    /// No type, only valid as the unset sentinel.
    Void,
    /// Unsigned 8-bit integer.
    UChar,
    /// Signed 8-bit integer.
    Char,
    /// Unsigned 16-bit integer.
    UShort,
    /// Signed 16-bit integer.
    Short,
    /// Unsigned 32-bit integer.
    UInt,
    /// Signed 32-bit integer.
    Int,
    /// Unsigned 64-bit integer.
    ULong,
    /// Signed 64-bit integer.
    Long,
    /// 16-bit float.
    Half,
    /// 32-bit float.
    Float,
    /// 64-bit float.
    Double,
}

impl BaseType {
    /// Every base type except [void](BaseType::Void).
    pub const ALL: [BaseType; 11] = [
        BaseType::UChar,
        BaseType::Char,
        BaseType::UShort,
        BaseType::Short,
        BaseType::UInt,
        BaseType::Int,
        BaseType::ULong,
        BaseType::Long,
        BaseType::Half,
        BaseType::Float,
        BaseType::Double,
    ];

    /// Size of one scalar in bytes.
    pub const fn size(self) -> usize {
        match self {
            BaseType::Void => 0,
            BaseType::UChar | BaseType::Char => 1,
            BaseType::UShort | BaseType::Short | BaseType::Half => 2,
            BaseType::UInt | BaseType::Int | BaseType::Float => 4,
            BaseType::ULong | BaseType::Long | BaseType::Double => 8,
        }
    }

    /// Name of the scalar type in kernel source.
    pub const fn name(self) -> &'static str {
        match self {
            BaseType::Void => "void",
            BaseType::UChar => "uchar",
            BaseType::Char => "char",
            BaseType::UShort => "ushort",
            BaseType::Short => "short",
            BaseType::UInt => "uint",
            BaseType::Int => "int",
            BaseType::ULong => "ulong",
            BaseType::Long => "long",
            BaseType::Half => "half",
            BaseType::Float => "float",
            BaseType::Double => "double",
        }
    }

    /// Whether the type is an integer type.
    pub const fn is_integral(self) -> bool {
        matches!(
            self,
            BaseType::UChar
                | BaseType::Char
                | BaseType::UShort
                | BaseType::Short
                | BaseType::UInt
                | BaseType::Int
                | BaseType::ULong
                | BaseType::Long
        )
    }

    /// Whether the type is signed. Floating point types are signed.
    pub const fn is_signed(self) -> bool {
        matches!(
            self,
            BaseType::Char
                | BaseType::Short
                | BaseType::Int
                | BaseType::Long
                | BaseType::Half
                | BaseType::Float
                | BaseType::Double
        )
    }

    /// The signed integer type of the same width, or the type itself.
    pub const fn to_signed(self) -> Self {
        match self {
            BaseType::UChar => BaseType::Char,
            BaseType::UShort => BaseType::Short,
            BaseType::UInt => BaseType::Int,
            BaseType::ULong => BaseType::Long,
            other => other,
        }
    }
}

impl Display for BaseType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name())
    }
}

/// Vector lengths an element type can have.
pub const VECTOR_LENGTHS: [u32; 6] = [1, 2, 3, 4, 8, 16];

/// Element type: a scalar base type and a vector length.
///
/// The only way to obtain a [void](BaseType::Void) element type is [ElemType::void], which
/// has a length of zero and is used as the "no type" sentinel, for example for a radix sort
/// without values.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "ElemTypeRepr", into = "ElemTypeRepr")]
pub struct ElemType {
    base: BaseType,
    length: u32,
}

#[derive(Serialize, Deserialize)]
struct ElemTypeRepr {
    base: BaseType,
    length: u32,
}

impl TryFrom<ElemTypeRepr> for ElemType {
    type Error = PrimitiveError;

    fn try_from(value: ElemTypeRepr) -> Result<Self, Self::Error> {
        match (value.base, value.length) {
            (BaseType::Void, 0) => Ok(Self::void()),
            (base, length) => Self::new(base, length),
        }
    }
}

impl From<ElemType> for ElemTypeRepr {
    fn from(value: ElemType) -> Self {
        Self {
            base: value.base,
            length: value.length,
        }
    }
}

impl Default for ElemType {
    fn default() -> Self {
        Self::void()
    }
}

impl ElemType {
    /// Create an element type, failing for void or an unsupported vector length.
    pub fn new(base: BaseType, length: u32) -> Result<Self, PrimitiveError> {
        if base == BaseType::Void {
            return Err(PrimitiveError::internal(
                "Void is not a valid element type, use ElemType::void for the sentinel",
            ));
        }
        if !VECTOR_LENGTHS.contains(&length) {
            return Err(PrimitiveError::internal(format!(
                "Invalid vector length {length} for {base}, expected one of {VECTOR_LENGTHS:?}"
            )));
        }

        Ok(Self { base, length })
    }

    /// Create a scalar element type.
    pub fn scalar(base: BaseType) -> Result<Self, PrimitiveError> {
        Self::new(base, 1)
    }

    /// The unset sentinel.
    pub const fn void() -> Self {
        Self {
            base: BaseType::Void,
            length: 0,
        }
    }

    /// Every valid non-void element type.
    pub fn all() -> Vec<Self> {
        BaseType::ALL
            .iter()
            .flat_map(|base| {
                VECTOR_LENGTHS.iter().map(|length| Self {
                    base: *base,
                    length: *length,
                })
            })
            .collect()
    }

    /// The scalar base type.
    pub fn base(&self) -> BaseType {
        self.base
    }

    /// The vector length, zero for void.
    pub fn length(&self) -> u32 {
        self.length
    }

    /// Whether this is the void sentinel.
    pub fn is_void(&self) -> bool {
        self.base == BaseType::Void
    }

    /// Size of the base type in bytes.
    pub fn base_size(&self) -> usize {
        self.base.size()
    }

    /// Size of one element in bytes: vector length times base size.
    pub fn size(&self) -> usize {
        self.length as usize * self.base.size()
    }

    /// Size one element occupies in device memory. Three-component vectors are stored like
    /// four-component ones.
    pub fn storage_size(&self) -> usize {
        match self.length {
            3 => 4 * self.base.size(),
            length => length as usize * self.base.size(),
        }
    }

    /// Name of the type in kernel source, e.g. `uint` or `float4`.
    pub fn name(&self) -> String {
        match self.length {
            0 | 1 => self.base.name().to_string(),
            length => format!("{}{length}", self.base.name()),
        }
    }

    /// Whether the base type is an integer type.
    pub fn is_integral(&self) -> bool {
        self.base.is_integral()
    }

    /// Whether the base type is signed.
    pub fn is_signed(&self) -> bool {
        self.base.is_signed()
    }

    /// The same vector of the signed integer type of equal width.
    pub fn to_signed(&self) -> Self {
        Self {
            base: self.base.to_signed(),
            length: self.length,
        }
    }

    /// Whether values of this type can be loaded and stored on the device.
    pub fn is_storable(&self, device: &DeviceProperties) -> bool {
        match self.base {
            BaseType::Void => false,
            BaseType::UChar | BaseType::Char if self.length < 3 => {
                device.feature_enabled(DeviceFeature::ByteAddressableStore)
            }
            BaseType::UShort | BaseType::Short if self.length < 2 => {
                device.feature_enabled(DeviceFeature::ByteAddressableStore)
            }
            BaseType::Half => device.feature_enabled(DeviceFeature::Fp16),
            BaseType::Double => device.feature_enabled(DeviceFeature::Fp64),
            _ => true,
        }
    }

    /// Whether arithmetic on this type is supported by the device.
    pub fn is_computable(&self, device: &DeviceProperties) -> bool {
        match self.base {
            BaseType::Void => false,
            BaseType::Half => device.feature_enabled(DeviceFeature::Fp16),
            BaseType::Double => device.feature_enabled(DeviceFeature::Fp64),
            _ => true,
        }
    }
}

impl Display for ElemType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.name())
    }
}
