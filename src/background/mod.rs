pub mod flows;
pub mod jobs;
pub mod pool;
pub mod processors;
pub mod registry;
pub mod uploader;
pub mod workspace;
