//! Tension Core
//!
//! Observer primitives shared by the tension animation engine:
//!
//! - **Listeners**: insertion-ordered listener lists with idempotent unsubscribe
//! - **Completion**: per-run completion tokens and the `Finished` future
//! - **Value sources**: the read/subscribe seam every value cell implements
//! - **Derived values**: pure transforms over one or more sources
//!
//! # Example
//!
//! ```rust
//! use tension_core::{Completion, RunToken};
//!
//! let mut token = RunToken::new();
//! let finished = token.finished();
//! token.resolve(Completion::Rested);
//! assert_eq!(futures::executor::block_on(finished), Completion::Rested);
//! ```

pub mod completion;
pub mod derived;
pub mod listeners;
pub mod source;

pub use completion::{Completion, Finished, RunToken};
pub use derived::{combine_values, transform_value, DerivedValue};
pub use listeners::{Listener, ListenerId, Listeners, Subscription};
pub use source::ValueSource;
