//! Shared utilities: logging, sanitization, RTL display fixes, splitting.

pub mod logging;
pub mod rtl;
pub mod split;
pub mod text;

pub use logging::{init_logging, mask_key, new_correlation_id, redact_secrets};
pub use rtl::{ensure_rtl_safe, has_rtl_text, strip_rtl_markers};
pub use split::{paginate, split_message};
