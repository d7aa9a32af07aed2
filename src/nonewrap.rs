use std::fmt::Display;

/// Turn a `Result` into an `Option`, logging the error instead of propagating it. For
/// side effects that should never stop the work around them.
pub trait Nonewrap {
    type Output;

    fn nonewrap(self, context: &str) -> Option<Self::Output>;
}

impl<T, E: Display> Nonewrap for Result<T, E> {
    type Output = T;

    fn nonewrap(self, context: &str) -> Option<Self::Output> {
        match self {
            Ok(v) => Some(v),
            Err(err) => {
                error!("{}: {}", context, err);
                None
            }
        }
    }
}
