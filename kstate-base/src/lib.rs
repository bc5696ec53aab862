mod diag;
mod error;

pub use diag::{set_sink, clear_sink, info as diag_info, warning as diag_warning, Level as DiagLevel};
pub use error::{invalid_argument, not_found, out_of_memory, os_error, permission_denied, Error, Result};
