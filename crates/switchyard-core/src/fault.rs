//! Faults recorded on an exchange.
//!
//! A [`Fault`] is a cheaply clonable, shareable error value. The selector keeps a
//! copy of the fault that triggered a failover so it can put the exact same value
//! back if the retry itself fails, which is why identity ([`Fault::same_as`]) is
//! part of the API.

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::error::TransportError;

/// A shared error value stored in an exchange or message fault slot.
#[derive(Clone)]
pub struct Fault(Arc<dyn StdError + Send + Sync + 'static>);

impl Fault {
    /// Wraps an error.
    pub fn new<E>(error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self(Arc::new(error))
    }

    /// Walks the error and all of its causes, outermost first.
    pub fn chain(&self) -> impl Iterator<Item = &(dyn StdError + 'static)> {
        let head: &(dyn StdError + 'static) = &*self.0;
        std::iter::successors(Some(head), |&err| err.source())
    }

    /// Whether any link of the cause chain is an I/O-class transport failure.
    ///
    /// Both raw [`std::io::Error`]s and I/O-class [`TransportError`]s count.
    pub fn is_transport_failure(&self) -> bool {
        self.chain().any(|err| {
            if let Some(transport) = err.downcast_ref::<TransportError>() {
                return transport.is_io_class();
            }
            err.is::<std::io::Error>()
        })
    }

    /// Returns the first link of the chain of type `E`.
    pub fn find<E: StdError + 'static>(&self) -> Option<&E> {
        self.chain().find_map(|err| err.downcast_ref::<E>())
    }

    /// Identity comparison: true only for clones of the same fault.
    pub fn same_as(&self, other: &Fault) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&*self.0, f)
    }
}

impl StdError for Fault {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.0.source()
    }
}

impl From<TransportError> for Fault {
    fn from(err: TransportError) -> Self {
        Self::new(err)
    }
}

impl From<std::io::Error> for Fault {
    fn from(err: std::io::Error) -> Self {
        Self::new(err)
    }
}

impl From<ApplicationFault> for Fault {
    fn from(err: ApplicationFault) -> Self {
        Self::new(err)
    }
}

/// A fault raised by the remote service itself.
///
/// Application faults are part of the normal contract of an operation and are
/// never a reason to try another address.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Application fault {code}: {message}")]
pub struct ApplicationFault {
    /// Service-defined fault code
    pub code: String,
    /// Human readable description
    pub message: String,
}

impl ApplicationFault {
    /// Creates a new application fault.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}
