pub mod lifecycle;
pub mod observer;
pub mod persistence;
pub mod scene;
pub mod semantic;
pub mod store;

pub use lifecycle::{MemoryLifecycleManager, StagedMemory, SweepReport};
pub use observer::ObserverRegistry;
pub use persistence::{JsonFileSink, MemorySink};
pub use scene::DirSceneSource;
pub use semantic::InMemorySemanticIndex;
pub use store::SharedStateStore;
