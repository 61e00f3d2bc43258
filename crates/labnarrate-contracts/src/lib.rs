pub mod confidence;
pub mod events;
pub mod labs;
pub mod models;
pub mod narration;
pub mod runs;
