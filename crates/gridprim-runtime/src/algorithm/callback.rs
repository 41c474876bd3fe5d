use core::fmt::Debug;

/// Completion callback of an [algorithm](super::Algorithm).
///
/// The callback owns whatever it captures: dropping it, when it is replaced or when the
/// algorithm is disposed, releases the captured state exactly once.
pub struct EventCallback<E> {
    func: Box<dyn FnMut(&E) + Send>,
}

impl<E: 'static> EventCallback<E> {
    /// Create a callback from a closure.
    pub fn new<F: FnMut(&E) + Send + 'static>(func: F) -> Self {
        Self {
            func: Box::new(func),
        }
    }

    /// Create a callback from a function and its user data.
    ///
    /// `free`, when provided, receives the user data once the callback is dropped.
    pub fn with_user_data<T: Send + 'static>(
        callback: fn(&E, &mut T),
        user_data: T,
        free: Option<fn(T)>,
    ) -> Self {
        let mut user_data = UserData {
            value: Some(user_data),
            free,
        };

        Self::new(move |event| {
            if let Some(value) = user_data.value.as_mut() {
                callback(event, value);
            }
        })
    }

    pub(crate) fn call(&mut self, event: &E) {
        (self.func)(event)
    }
}

impl<E> Debug for EventCallback<E> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("EventCallback")
    }
}

struct UserData<T> {
    value: Option<T>,
    free: Option<fn(T)>,
}

impl<T> Drop for UserData<T> {
    fn drop(&mut self) {
        if let (Some(value), Some(free)) = (self.value.take(), self.free) {
            free(value);
        }
    }
}
