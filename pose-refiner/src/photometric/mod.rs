//! Direct photometric alignment on SE(3).
//!
//! A [`PhotometricTemplate`] is built once from a reference frame (channels
//! plus depth) and then aligned against live [`ChannelStack`]s by an
//! [`IterativeRefiner`](crate::optimizer::IterativeRefiner).

pub mod camera;
pub mod image;
pub mod template;

pub use camera::PinholeCamera;
pub use image::{ChannelStack, Image};
pub use template::{PhotometricTemplate, TemplateOptions};
