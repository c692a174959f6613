//! Terminal interface for the Querious client

mod render;
mod ui;


pub use render::{
    content_delta, document_line, format_size, limit_message, limits_lines, print_upload_report,
    remaining_label, session_line, sources_line, upload_lines, Delta, StreamPrinter,
};
pub use ui::{
    confirm, display_banner, handle_input_with_history, print_help, prompt_line, prompt_secret,
};

// Re-export core types
pub use querious_core::{Error, Result};
