//! The suspension protocol.
//!
//! Every resumable operation returns [`PollResult`]: an error, a ready
//! value, or `Poll::Pending` meaning "upstream has no data yet, call again
//! later". Pending is never an error. An operation that returns Pending
//! must keep everything it already computed in its own state so that the
//! retried call continues instead of starting over.

pub use std::task::Poll;

use federa_common::error::FederaResult;

/// Result of a resumable operation.
pub type PollResult<T> = FederaResult<Poll<T>>;

/// Unwraps a [`PollResult`], returning early with the error or with
/// `Ok(Poll::Pending)`.
///
/// ```rust
/// use federa_exec::poll::{Poll, PollResult};
/// use federa_exec::ready;
///
/// fn double(input: PollResult<i32>) -> PollResult<i32> {
///     let value = ready!(input);
///     Ok(Poll::Ready(value * 2))
/// }
///
/// assert!(matches!(double(Ok(Poll::Ready(2))), Ok(Poll::Ready(4))));
/// assert!(matches!(double(Ok(Poll::Pending)), Ok(Poll::Pending)));
/// ```
#[macro_export]
macro_rules! ready {
    ($e:expr $(,)?) => {
        match $e? {
            ::std::task::Poll::Ready(value) => value,
            ::std::task::Poll::Pending => {
                return ::std::result::Result::Ok(::std::task::Poll::Pending)
            }
        }
    };
}

/// Converts a result that can never be pending into a plain result.
///
/// Used where the source is a buffer, which never suspends.
pub fn expect_ready<T>(result: PollResult<T>, what: &str) -> FederaResult<T> {
    match result? {
        Poll::Ready(value) => Ok(value),
        Poll::Pending => Err(federa_common::FederaError::invariant(format!(
            "{what} suspended while reading buffered rows"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use federa_common::FederaError;

    fn passthrough(input: PollResult<u8>) -> PollResult<u8> {
        let v = ready!(input);
        Ok(Poll::Ready(v + 1))
    }

    #[test]
    fn test_ready_macro() {
        assert!(matches!(passthrough(Ok(Poll::Ready(1))), Ok(Poll::Ready(2))));
        assert!(matches!(passthrough(Ok(Poll::Pending)), Ok(Poll::Pending)));
        assert!(passthrough(Err(FederaError::processing("boom"))).is_err());
    }

    #[test]
    fn test_expect_ready() {
        assert_eq!(expect_ready(Ok(Poll::Ready(5)), "test").unwrap(), 5);
        let err = expect_ready::<u8>(Ok(Poll::Pending), "merge").unwrap_err();
        assert!(err.is_component());
    }
}
