//! Observer pattern for adjustment monitoring.
//!
//! The adjustment pushes an [`AdjustmentEvent`] after every state transition. Observers are
//! registered with [`crate::adjustment::FeatureAdjustment::add_observer`] and receive the
//! events on the estimating thread, so a front end never has to poll the estimator.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────┐
//! │ FeatureAdjustment  │
//! │                    │──notify(event)──┐
//! └────────────────────┘                 │
//!                                        ▼
//!                          ┌──────────────────────────┐
//!                          │  AdjustmentObserverVec   │
//!                          └──────────────────────────┘
//!                              │                 │
//!                              ▼                 ▼
//!                     ┌────────────────┐  ┌───────────────┐
//!                     │ ChannelObserver│  │ custom closure│
//!                     │  (mpsc::Sender)│  │   observers   │
//!                     └────────────────┘  └───────────────┘
//! ```
//!
//! [`ChannelObserver`] forwards every event through a `std::sync::mpsc` channel, which is
//! the usual way to report progress to another thread.
//!
//! # Examples
//!
//! ```
//! use geofit::observers::{AdjustmentObserverVec, ChannelObserver};
//!
//! let (observer, receiver) = ChannelObserver::new();
//! let mut observers = AdjustmentObserverVec::new();
//! observers.add(observer);
//! assert_eq!(observers.len(), 1);
//! assert!(receiver.try_recv().is_err());
//! ```

use std::fmt::{self, Display, Formatter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use thiserror::Error;
use tracing::{error, warn};

use crate::adjustment::EstimationStateType;

/// Observer-specific error types
#[derive(Debug, Clone, Error)]
pub enum ObserverError {
    /// The receiving side of a channel observer was dropped
    #[error("Event channel closed: {0}")]
    ChannelClosed(String),

    /// Mutex was poisoned (thread panicked while holding lock)
    #[error("Mutex poisoned in {context}: {reason}")]
    MutexPoisoned { context: String, reason: String },
}

impl ObserverError {
    /// Log the error with tracing::error and return self for chaining
    ///
    /// # Example
    /// ```ignore
    /// operation()
    ///     .map_err(|e| ObserverError::from(e).log())?;
    /// ```
    #[must_use]
    pub fn log(self) -> Self {
        error!("{}", self);
        self
    }

    /// Log the error with the original source error
    ///
    /// # Arguments
    /// * `source_error` - The underlying error (must implement Debug)
    #[must_use]
    pub fn log_with_source<E: std::fmt::Debug>(self, source_error: E) -> Self {
        error!("{} | Source: {:?}", self, source_error);
        self
    }
}

/// Result type for observer operations
pub type ObserverResult<T> = Result<T, ObserverError>;

/// Progress report of an adjustment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdjustmentEvent {
    /// State entered by the estimator
    pub state: EstimationStateType,
    /// Iteration step, starting at 1
    pub iteration: usize,
    pub maximum_iterations: usize,
    /// Largest absolute parameter update of the last step
    pub max_abs_dx: f64,
    /// Largest absolute restriction misclosure of the last linearization
    pub max_abs_restriction: f64,
}

impl Display for AdjustmentEvent {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}/{}] max|dx| = {:.3e}, max|r| = {:.3e}",
            self.state,
            self.iteration,
            self.maximum_iterations,
            self.max_abs_dx,
            self.max_abs_restriction
        )
    }
}

/// Observer trait for monitoring adjustment progress.
///
/// # Design Notes
///
/// - Observers should be lightweight and non-blocking
/// - Errors in observers must not abort the adjustment (handle internally)
/// - Observers receive immutable events and cannot steer the estimator; use a
///   [`crate::adjustment::CancellationToken`] to stop it
///
/// # Thread Safety
///
/// Observers must be `Send` so that an adjustment can be moved to a worker thread.
/// Use interior mutability (`Mutex`, atomics) to collect state.
pub trait AdjustmentObserver: Send {
    /// Called after every state transition of the estimator.
    fn on_event(&self, event: &AdjustmentEvent);
}

impl<F> AdjustmentObserver for F
where
    F: Fn(&AdjustmentEvent) + Send,
{
    fn on_event(&self, event: &AdjustmentEvent) {
        self(event)
    }
}

/// Collection of observers notified in registration order.
#[derive(Default)]
pub struct AdjustmentObserverVec {
    observers: Vec<Box<dyn AdjustmentObserver>>,
}

impl AdjustmentObserverVec {
    pub fn new() -> Self {
        Self {
            observers: Vec::new(),
        }
    }

    pub fn add(&mut self, observer: impl AdjustmentObserver + 'static) {
        self.observers.push(Box::new(observer));
    }

    /// Notify all observers. A no-op when none are registered.
    #[inline]
    pub fn notify(&self, event: &AdjustmentEvent) {
        for observer in &self.observers {
            observer.on_event(event);
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.observers.len()
    }
}

impl fmt::Debug for AdjustmentObserverVec {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdjustmentObserverVec")
            .field("len", &self.observers.len())
            .finish()
    }
}

/// Forwards events through a `std::sync::mpsc` channel.
///
/// Once the receiver is dropped the observer stops sending and reports the closed
/// channel a single time.
pub struct ChannelObserver {
    sender: Sender<AdjustmentEvent>,
    closed: AtomicBool,
}

impl ChannelObserver {
    /// Observer and the receiving end of its channel.
    pub fn new() -> (Self, Receiver<AdjustmentEvent>) {
        let (sender, receiver) = mpsc::channel();
        (Self::with_sender(sender), receiver)
    }

    pub fn with_sender(sender: Sender<AdjustmentEvent>) -> Self {
        Self {
            sender,
            closed: AtomicBool::new(false),
        }
    }

    /// Send a single event.
    ///
    /// # Errors
    /// `ChannelClosed` if the receiver was dropped.
    pub fn send(&self, event: &AdjustmentEvent) -> ObserverResult<()> {
        self.sender.send(*event).map_err(|e| {
            ObserverError::ChannelClosed(format!("cannot deliver '{}'", event)).log_with_source(e)
        })
    }
}

impl AdjustmentObserver for ChannelObserver {
    fn on_event(&self, event: &AdjustmentEvent) {
        if self.closed.load(Ordering::Relaxed) {
            return;
        }
        if self.send(event).is_err() {
            warn!("Adjustment progress channel closed, further events are dropped");
            self.closed.store(true, Ordering::Relaxed);
        }
    }
}
