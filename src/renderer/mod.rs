//! Rendering-side plumbing for streamed terrain meshes: device context,
//! deferred buffer reclamation, per-chunk mesh slots and the dynamic
//! drawable registry.

pub mod chunk_renderer;
pub mod context;
pub mod render_system;

pub use chunk_renderer::{MeshChunkRenderer, SlotEvent};
pub use context::{DeferredFreeQueue, RenderContext, FRAMES_IN_FLIGHT};
pub use render_system::{Aabb, DrawableId, DynamicDrawable, RenderSystem};
