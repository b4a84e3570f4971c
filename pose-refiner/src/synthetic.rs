//! Ray-cast renderer of a textured box room.
//!
//! The camera sits inside an axis-aligned box whose walls carry a smooth
//! solid texture, so every pixel sees a wall with known depth and non-zero
//! gradient. Poses map world points into the camera frame (`X_c = T · X_w`).

use crate::core::{CoreError, CoreResult};
use crate::manifold::SE3;
use crate::photometric::{ChannelStack, Image, PinholeCamera};
use nalgebra::Vector3;
use rayon::prelude::*;

/// One rendered view.
#[derive(Debug, Clone)]
pub struct RenderedFrame {
    pub channels: ChannelStack,
    /// Camera-frame z of the surface seen by each pixel
    pub depth: Image,
}

/// Box room scene with a pinhole camera.
#[derive(Debug, Clone)]
pub struct BoxRoomScene {
    camera: PinholeCamera,
    min: Vector3<f64>,
    max: Vector3<f64>,
}

impl BoxRoomScene {
    /// Room spanning x ∈ [-1.5, 1.8], y ∈ [-1.2, 1] (floor at y = 1),
    /// z ∈ [-1, 4] around the world origin.
    pub fn new(camera: PinholeCamera) -> Self {
        BoxRoomScene {
            camera,
            min: Vector3::new(-1.5, -1.2, -1.0),
            max: Vector3::new(1.8, 1.0, 4.0),
        }
    }

    pub fn with_bounds(
        camera: PinholeCamera,
        min: Vector3<f64>,
        max: Vector3<f64>,
    ) -> CoreResult<Self> {
        if !(min.iter().all(|&v| v < 0.0) && max.iter().all(|&v| v > 0.0)) {
            return Err(CoreError::InvalidInput(format!(
                "room [{min:?}, {max:?}] must contain the world origin"
            )));
        }
        Ok(BoxRoomScene { camera, min, max })
    }

    pub fn camera(&self) -> &PinholeCamera {
        &self.camera
    }

    /// Texture value of channel `channel` at a world point, in `[0, 1]`.
    pub fn shade(point: &Vector3<f64>, channel: usize) -> f32 {
        let phase = 0.9 * channel as f64;
        let (x, y, z) = (point.x, point.y, point.z);
        let value = 0.5
            + 0.14 * (2.1 * x + 0.3 + phase).sin() * (1.7 * y - phase).cos()
            + 0.12 * (2.9 * z + 1.1 * x).sin()
            + 0.1 * (2.3 * y - 1.9 * z + phase).cos()
            + 0.08 * (3.7 * x - 2.6 * y + 1.3 * z).sin();
        value as f32
    }

    /// Render one intensity channel and depth as seen from `pose`.
    pub fn render(&self, pose: &SE3) -> CoreResult<RenderedFrame> {
        self.render_channels(pose, 1)
    }

    /// Render `num_channels` differently-phased texture channels and depth.
    ///
    /// # Errors
    /// Fails when `num_channels` is zero or the camera center is outside the room.
    pub fn render_channels(&self, pose: &SE3, num_channels: usize) -> CoreResult<RenderedFrame> {
        if num_channels == 0 {
            return Err(CoreError::InvalidInput(
                "at least one channel must be rendered".to_string(),
            ));
        }
        let camera_to_world = pose.inverse();
        let origin = *camera_to_world.translation();
        if !self.contains(&origin) {
            return Err(CoreError::InvalidInput(format!(
                "camera center {:?} is outside the room",
                origin
            )));
        }

        let (width, height) = (self.camera.width, self.camera.height);
        let samples: Vec<(f64, Vector3<f64>)> = (0..width * height)
            .into_par_iter()
            .map(|index| {
                let ray = self
                    .camera
                    .back_project((index % width) as f64, (index / width) as f64, 1.0);
                let direction = camera_to_world.rotation().act(&ray);
                let t = self.exit_distance(&origin, &direction);
                (t, origin + direction * t)
            })
            .collect();

        let depth = Image::new(
            width,
            height,
            samples.iter().map(|(t, _)| *t as f32).collect(),
        )?;
        let channels = (0..num_channels)
            .map(|c| {
                Image::new(
                    width,
                    height,
                    samples.iter().map(|(_, hit)| Self::shade(hit, c)).collect(),
                )
            })
            .collect::<CoreResult<Vec<_>>>()?;

        Ok(RenderedFrame {
            channels: ChannelStack::new(channels)?,
            depth,
        })
    }

    fn contains(&self, point: &Vector3<f64>) -> bool {
        (0..3).all(|k| point[k] > self.min[k] && point[k] < self.max[k])
    }

    /// Ray parameter at which a ray from inside the box leaves it.
    fn exit_distance(&self, origin: &Vector3<f64>, direction: &Vector3<f64>) -> f64 {
        (0..3)
            .filter(|&k| direction[k].abs() > f64::EPSILON)
            .map(|k| {
                let wall = if direction[k] > 0.0 {
                    self.max[k]
                } else {
                    self.min[k]
                };
                (wall - origin[k]) / direction[k]
            })
            .fold(f64::INFINITY, f64::min)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifold::SO3;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn scene() -> CoreResult<BoxRoomScene> {
        Ok(BoxRoomScene::new(PinholeCamera::new(
            40.0, 40.0, 31.5, 23.5, 64, 48,
        )?))
    }

    #[test]
    fn test_center_pixel_sees_back_wall() -> TestResult {
        let scene = scene()?;
        let camera = PinholeCamera::new(40.0, 40.0, 32.0, 24.0, 65, 49)?;
        let centered = BoxRoomScene::new(camera);
        let frame = centered.render(&SE3::identity())?;
        assert!((frame.depth.get(32, 24) - 4.0).abs() < 1e-5);

        let frame = scene.render(&SE3::identity())?;
        assert!(frame.depth.data().iter().all(|&d| d > 0.0 && d <= 4.0 + 1e-4));
        Ok(())
    }

    #[test]
    fn test_rendered_depth_is_consistent_with_geometry() -> TestResult {
        let scene = scene()?;
        let pose = SE3::new(
            SO3::from_euler_angles(0.05, -0.1, 0.02),
            Vector3::new(0.1, -0.05, 0.2),
        );
        let frame = scene.render(&pose)?;
        let camera = scene.camera();
        let world_from_camera = pose.inverse();
        for (u, v) in [(3, 4), (30, 20), (60, 44)] {
            let point = camera.back_project(u as f64, v as f64, f64::from(frame.depth.get(u, v)));
            let world = world_from_camera.act(&point);
            let on_wall = (0..3).any(|k| {
                (world[k] - scene.min[k]).abs() < 1e-4 || (world[k] - scene.max[k]).abs() < 1e-4
            });
            assert!(on_wall, "pixel ({u}, {v}) at {world:?}");
        }
        Ok(())
    }

    #[test]
    fn test_multi_channel_render() -> TestResult {
        let frame = scene()?.render_channels(&SE3::identity(), 3)?;
        assert_eq!(frame.channels.num_channels(), 3);
        assert_ne!(frame.channels.channel(0), frame.channels.channel(1));
        assert!(
            frame
                .channels
                .channel(2)
                .data()
                .iter()
                .all(|&v| (0.0..=1.0).contains(&v))
        );
        Ok(())
    }

    #[test]
    fn test_rejects_camera_outside_room() -> TestResult {
        let scene = scene()?;
        let outside = SE3::new(SO3::identity(), Vector3::new(0.0, 0.0, 10.0));
        assert!(scene.render(&outside).is_err());
        assert!(scene.render_channels(&SE3::identity(), 0).is_err());
        Ok(())
    }
}
