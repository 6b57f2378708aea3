pub mod backend;
pub mod config;
pub mod exec;
pub mod graph;
pub mod location;
pub mod lock;
pub mod options;
pub mod redacted;
pub mod result_error;
pub mod runner;
pub mod schedule;
pub mod selection;
pub mod topo;
pub mod validate;

macro_rules! function_path {
    () => {
        concat!(module_path!(), "::", function_name!(), " ", file!(), ":", line!())
    };
}

pub(crate) use function_path;
