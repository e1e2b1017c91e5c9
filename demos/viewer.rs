//! Minimal viewer: terrain, a field of cubes, a sun and a few point
//! lights, driven through the public rendering contract.
//!
//! Keys: `V` vsync, `H` Hi-Z, `F` freeze culling, `B` debug view,
//! `O` wireframe, `M` SDSM.

use std::sync::Arc;

use glam::{Mat4, Vec3};
use winit::application::ApplicationHandler;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::{Window, WindowId};

use strata::resources::primitives;
use strata::{
    Camera, DeferredRenderer, Effect, Material, PassMask, PointLight, RenderSettings, TerrainDesc,
};

struct SceneObject {
    mesh_part: u32,
    material_id: u32,
    transform_slot: u32,
}

struct Viewer {
    window: Arc<Window>,
    renderer: DeferredRenderer,
    camera: Camera,
    objects: Vec<SceneObject>,
    angle: f32,
}

impl Viewer {
    fn new(window: Arc<Window>) -> strata::Result<Self> {
        let size = window.inner_size();
        let settings = RenderSettings {
            skybox_enabled: true,
            ..Default::default()
        };
        let mut renderer = pollster::block_on(DeferredRenderer::new(
            window.clone(),
            settings,
            size.width,
            size.height,
        ))?;

        renderer.set_sun(Vec3::new(-0.5, -1.0, -0.3), Vec3::new(1.0, 0.96, 0.9), 3.0);

        // Rolling terrain from a closed-form heightmap.
        let resolution = 1024u32;
        let mut heightmap = vec![0.0f32; (resolution * resolution) as usize];
        for y in 0..resolution {
            for x in 0..resolution {
                let (fx, fy) = (x as f32 / resolution as f32, y as f32 / resolution as f32);
                let h = (fx * 19.0).sin() * (fy * 23.0).cos() * 0.25
                    + (fx * 3.0).sin() * (fy * 2.0).cos() * 0.6
                    + 0.9;
                heightmap[(y * resolution + x) as usize] = h * 0.5;
            }
        }
        renderer.set_terrain(
            &heightmap,
            resolution,
            TerrainDesc {
                origin: (-1024.0, -1024.0),
                world_size: 2048.0,
                height_scale: 120.0,
            },
        );

        // A grid of cubes through the batched path.
        let cube = renderer.register_mesh(&primitives::cube(2.0))?;
        let effect = renderer.materials().register_effect(Effect::standard());
        let mut objects = Vec::new();
        for i in 0..24i32 {
            for j in 0..24i32 {
                let mut material = Material::new(effect);
                material.set_base_color([
                    0.3 + 0.7 * (i as f32 / 24.0),
                    0.5,
                    0.3 + 0.7 * (j as f32 / 24.0),
                    1.0,
                ]);
                material.set_parameter("roughness", 0.4);
                let material_id = renderer.materials().register(&material);

                let slot = renderer
                    .transforms()
                    .allocate_slot()
                    .ok_or_else(|| strata::StrataError::AllocationFailed("transforms".into()))?;
                renderer.transforms().set(
                    slot,
                    Mat4::from_translation(Vec3::new(
                        (i - 12) as f32 * 6.0,
                        61.0,
                        (j - 12) as f32 * 6.0,
                    )),
                );
                objects.push(SceneObject {
                    mesh_part: cube.parts[0],
                    material_id,
                    transform_slot: slot,
                });
            }
        }

        for k in 0..6 {
            let angle = k as f32 / 6.0 * std::f32::consts::TAU;
            renderer.add_point_light(PointLight {
                position: Vec3::new(angle.cos() * 40.0, 64.0, angle.sin() * 40.0),
                radius: 30.0,
                color: Vec3::new(1.0, 0.5 + 0.5 * angle.sin(), 0.3),
                intensity: 120.0,
            });
        }

        let camera = Camera::new_perspective(
            60.0,
            size.width.max(1) as f32 / size.height.max(1) as f32,
            0.1,
        );

        Ok(Self {
            window,
            renderer,
            camera,
            objects,
            angle: 0.0,
        })
    }

    fn frame(&mut self) {
        self.angle += 0.003;
        let eye = Vec3::new(self.angle.cos() * 120.0, 95.0, self.angle.sin() * 120.0);
        let world = Mat4::look_at_rh(eye, Vec3::new(0.0, 55.0, 0.0), Vec3::Y).inverse();
        self.camera.update_view_projection(&world);

        for object in &self.objects {
            self.renderer.command_buffer().enqueue_part(
                PassMask::OPAQUE | PassMask::SHADOW,
                object.mesh_part,
                object.material_id,
                None,
                object.transform_slot,
                false,
            );
        }

        let camera = self.camera.extract_render_camera();
        match self.renderer.tick(&camera) {
            Ok(stats) => self.window.set_title(&stats.status_line()),
            Err(e) => {
                log::error!("Fatal render error: {e}");
                std::process::exit(1);
            }
        }
    }
}

#[derive(Default)]
struct App {
    viewer: Option<Viewer>,
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.viewer.is_some() {
            return;
        }
        let window = Arc::new(
            event_loop
                .create_window(Window::default_attributes().with_title("strata viewer"))
                .expect("window creation"),
        );
        match Viewer::new(window) {
            Ok(viewer) => {
                viewer.window.request_redraw();
                self.viewer = Some(viewer);
            }
            Err(e) => {
                eprintln!("Renderer init failed: {e}");
                event_loop.exit();
            }
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _window_id: WindowId,
        event: WindowEvent,
    ) {
        let Some(viewer) = &mut self.viewer else {
            return;
        };
        match event {
            WindowEvent::CloseRequested => event_loop.exit(),
            WindowEvent::Resized(size) => {
                viewer.renderer.resize(size.width, size.height);
                viewer
                    .camera
                    .set_aspect(size.width.max(1) as f32 / size.height.max(1) as f32);
            }
            WindowEvent::KeyboardInput { event, .. } if event.state.is_pressed() => {
                let settings = viewer.renderer.settings_mut();
                match event.physical_key {
                    PhysicalKey::Code(KeyCode::KeyV) => settings.vsync = !settings.vsync,
                    PhysicalKey::Code(KeyCode::KeyH) => settings.hiz_enabled = !settings.hiz_enabled,
                    PhysicalKey::Code(KeyCode::KeyF) => {
                        settings.freeze_culling = !settings.freeze_culling;
                    }
                    PhysicalKey::Code(KeyCode::KeyB) => settings.cycle_debug_mode(),
                    PhysicalKey::Code(KeyCode::KeyO) => settings.wireframe = !settings.wireframe,
                    PhysicalKey::Code(KeyCode::KeyM) => settings.sdsm = !settings.sdsm,
                    _ => {}
                }
            }
            WindowEvent::RedrawRequested => {
                viewer.frame();
                viewer.window.request_redraw();
            }
            _ => {}
        }
    }
}

fn main() {
    env_logger::init();
    let event_loop = EventLoop::new().expect("event loop");
    let mut app = App::default();
    event_loop.run_app(&mut app).expect("event loop run");
}
