//! # DUPLEX
//!
//! Frame loop integration for [`duplex_core`]:
//! - [`FrameLoop`] runs the per-frame update / sync / swap sequence
//! - [`Texture`] and [`Material`] show how a resource implements the
//!   core object contract, including partial dirty flags and a dependency
//!
//! ## Example
//!
//! ```rust,ignore
//! use duplex::{FrameLoop, FrameLoopConfig, Material, Texture};
//!
//! let mut frame_loop = FrameLoop::new(FrameLoopConfig::default())?;
//! let texture = Texture::new(frame_loop.resources(), 64, 64);
//! let material = Material::new(frame_loop.resources());
//! material.set_texture(Some(&texture))?;
//!
//! frame_loop.run_frame(|_| texture.resize(128, 128))?;
//! frame_loop.finish()?;
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod frame_loop;
pub mod resources;

pub use frame_loop::{FrameContext, FrameLoop, FrameLoopConfig, FrameStats, FrameStatsAccumulator};
pub use resources::{
    Material, MaterialCore, MaterialSnapshot, ResourceContext, Texture, TextureCore,
    TextureSnapshot, TextureTable,
};
