//! Worker process side of a session

mod pipeline;

pub use pipeline::{
    abort_worker, close_inherited_descriptors, spawn_stage, FilterPipeline, StageSide,
};
