pub mod process;

pub use process::ProcessWorkerLauncher;
