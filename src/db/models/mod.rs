pub mod work_log;

pub use work_log::{NewWorkLog, WorkLog};
