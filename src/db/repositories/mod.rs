mod completions;
mod remote_sessions;
mod work_logs;
