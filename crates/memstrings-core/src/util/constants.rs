/// Mount point of procfs
pub const PROC_ROOT: &str = "/proc";
