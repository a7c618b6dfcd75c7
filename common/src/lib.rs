//! Shared pieces of the mrb batch system. Job inputs live on an
//! S3-compatible store addressed through [`dfs`]; the master enumerates and
//! splits them, workers read the byte ranges they are handed.

pub mod dfs;
