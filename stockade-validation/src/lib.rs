//! Layered validation and sanitization for model-proposed values.
//!
//! Everything an agent wants to act on, whether a command line, a file path
//! or a free-form prompt, flows through [`InputValidator`] before any other
//! part of the pipeline touches it. Validation never panics and never
//! returns early with an `Err`; the verdict, the sanitized value, and every
//! finding are reported together in a [`ValidationResult`].
//!
//! ```
//! use stockade_validation::{InjectionKind, InputValidator};
//!
//! let validator = InputValidator::new();
//! let verdict = validator.validate_command("ls; rm -rf /", false);
//! assert!(!verdict.is_valid);
//! assert!(verdict.blocked(InjectionKind::CommandInjection));
//! ```

mod patterns;
mod result;
mod sanitize;
mod validator;

pub use result::{InjectionKind, ValidationLayer, ValidationResult};
pub use sanitize::sanitize_value;
pub use validator::{InputType, InputValidator, PathValidationOptions, ValidatorOptions};
