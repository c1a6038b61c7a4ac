mod io;
mod types;

pub(in crate::distributed) use io::{read_message, send_message};
pub use types::{ConfigureMessage, ErrorMessage, Reply, Request, StatusMessage, StopMessage};
