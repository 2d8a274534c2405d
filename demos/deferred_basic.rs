//! Loads a glTF model, renders it into the G-buffer and composites the
//! result to the window.
//!
//! `cargo run --example deferred_basic -- path/to/model.gltf`

use std::sync::Arc;
use std::time::Instant;

use deferred3d::model::{ImportedModel, ModelImporter};
use deferred3d::renderer::pipelines::{MaterialBinding, ObjectBinding, ObjectUniform};
use deferred3d::renderer::{
    bind_gbuffer_for_composite, CompositePipeline, DeferredPass, GBuffer, GeometryPipeline,
    GpuMesh, RenderBackend, SourceRect, WgpuBackend,
};
use deferred3d::settings::Settings;
use glam::{Mat4, Vec3};
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::{ElementState, KeyEvent, WindowEvent};
use winit::event_loop::{ActiveEventLoop, EventLoop};
use winit::keyboard::{Key, NamedKey};
use winit::window::{Window, WindowId};

struct Scene {
    model: ImportedModel,
    meshes: Vec<GpuMesh>,
    objects: Vec<ObjectBinding>,
    materials: Vec<MaterialBinding>,
    center: Vec3,
    radius: f32,
}

struct DemoState {
    window: Arc<Window>,
    surface: wgpu::Surface<'static>,
    config: wgpu::SurfaceConfiguration,
    backend: WgpuBackend,
    gbuffer: Option<GBuffer>,
    geometry: GeometryPipeline,
    composite: CompositePipeline,
    scene: Scene,
    start: Instant,
}

impl DemoState {
    async fn new(window: Arc<Window>, settings: &Settings, model_path: &str) -> Self {
        let size = window.inner_size();
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());
        let surface = instance.create_surface(window.clone()).expect("surface");
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .expect("adapter");
        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("Device"),
                ..Default::default()
            })
            .await
            .expect("device");

        let caps = surface.get_capabilities(&adapter);
        let format = caps
            .formats
            .iter()
            .copied()
            .find(|f| f.is_srgb())
            .unwrap_or(caps.formats[0]);
        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: settings.present_mode(&caps.present_modes),
            alpha_mode: caps.alpha_modes[0],
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &config);

        let mut backend = WgpuBackend::new(device, queue, format, config.width, config.height);
        backend.set_clear_color(wgpu::Color {
            r: 0.1,
            g: 0.1,
            b: 0.12,
            a: 1.0,
        });

        let gbuffer = GBuffer::create_with_policy(
            &mut backend,
            config.width,
            config.height,
            settings.failure_policy,
        )
        .expect("G-buffer");

        let geometry = GeometryPipeline::new(backend.device());
        let composite = CompositePipeline::new(backend.device(), format);

        let model = ModelImporter::new(settings.import.clone())
            .load_with_policy(&mut backend, model_path, settings.failure_policy)
            .expect("model");
        for issue in &model.issues {
            log::warn!("import issue: {issue}");
        }
        let scene = Scene::upload(&backend, &geometry, model);

        Self {
            window,
            surface,
            config,
            backend,
            gbuffer: Some(gbuffer),
            geometry,
            composite,
            scene,
            start: Instant::now(),
        }
    }

    fn resize(&mut self, size: PhysicalSize<u32>) {
        if size.width == 0 || size.height == 0 {
            return;
        }
        self.config.width = size.width;
        self.config.height = size.height;
        self.surface.configure(self.backend.device(), &self.config);
        self.backend.resize(size.width, size.height);
        if let Some(gbuffer) = self.gbuffer.take() {
            self.gbuffer = Some(gbuffer.recreate(&mut self.backend, size.width, size.height));
        }
    }

    fn render(&mut self) -> Result<(), wgpu::SurfaceError> {
        let Some(gbuffer) = self.gbuffer.as_ref() else {
            return Ok(());
        };
        let frame = self.surface.get_current_texture()?;
        let view = frame
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        self.backend.begin_frame(view);

        let aspect = self.config.width as f32 / self.config.height as f32;
        let scene = &self.scene;
        let eye = scene.center + Vec3::new(0.0, scene.radius * 0.6, scene.radius * 2.5);
        let view_proj = Mat4::perspective_rh(45f32.to_radians(), aspect, 0.05, scene.radius * 10.0)
            * Mat4::look_at_rh(eye, scene.center, Vec3::Y);
        let spin = Mat4::from_translation(scene.center)
            * Mat4::from_rotation_y(self.start.elapsed().as_secs_f32() * 0.5)
            * Mat4::from_translation(-scene.center)
            * scene.model.transform;
        let uniform = ObjectUniform::new(view_proj, spin);
        for object in &scene.objects {
            object.update(self.backend.queue(), &uniform);
        }

        match DeferredPass::begin(&mut self.backend, gbuffer) {
            Ok(mut pass) => {
                for (index, mesh) in scene.meshes.iter().enumerate() {
                    let material = scene.model.mesh_material[index];
                    pass.backend().draw_mesh(
                        &self.geometry,
                        mesh,
                        &scene.objects[index],
                        &scene.materials[material],
                    );
                }
            }
            Err(err) => log::warn!("skipping geometry pass: {err}"),
        }

        self.backend.clear();
        bind_gbuffer_for_composite(&mut self.backend, gbuffer);
        let source = SourceRect::for_gbuffer(gbuffer, self.backend.row_order());
        self.backend.draw_composite(&self.composite, source);
        self.backend.end_frame();

        frame.present();
        Ok(())
    }

    fn shutdown(&mut self) {
        if let Some(gbuffer) = self.gbuffer.take() {
            gbuffer.destroy(&mut self.backend);
        }
        let model = std::mem::take(&mut self.scene.model);
        model.unload(&mut self.backend);
    }
}

impl Scene {
    fn upload(backend: &WgpuBackend, geometry: &GeometryPipeline, model: ImportedModel) -> Self {
        let device = backend.device();
        let meshes: Vec<GpuMesh> = model
            .meshes
            .iter()
            .map(|mesh| GpuMesh::upload(device, mesh, None))
            .collect();
        let identity = ObjectUniform::new(Mat4::IDENTITY, Mat4::IDENTITY);
        let objects = meshes
            .iter()
            .map(|_| ObjectBinding::new(device, geometry, &identity))
            .collect();
        let materials = model
            .materials
            .iter()
            .map(|material| MaterialBinding::new(backend, geometry, material))
            .collect();

        let (min, max) = model
            .meshes
            .iter()
            .flat_map(|mesh| mesh.positions().iter())
            .map(Vec3::from)
            .fold((Vec3::splat(f32::MAX), Vec3::splat(f32::MIN)), |(min, max), p| {
                (min.min(p), max.max(p))
            });
        let (center, radius) = if min.x <= max.x {
            ((min + max) * 0.5, ((max - min).length() * 0.5).max(0.1))
        } else {
            (Vec3::ZERO, 1.0)
        };

        Self {
            model,
            meshes,
            objects,
            materials,
            center,
            radius,
        }
    }
}

struct DemoApp {
    settings: Settings,
    model_path: String,
    state: Option<DemoState>,
}

impl ApplicationHandler for DemoApp {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.state.is_some() {
            return;
        }
        let resolution = self.settings.resolution;
        let attributes = Window::default_attributes()
            .with_title("deferred3d")
            .with_inner_size(PhysicalSize::new(resolution.width, resolution.height));
        let window = Arc::new(event_loop.create_window(attributes).expect("create window"));
        let state = pollster::block_on(DemoState::new(window, &self.settings, &self.model_path));
        state.window.request_redraw();
        self.state = Some(state);
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, id: WindowId, event: WindowEvent) {
        let Some(state) = self.state.as_mut() else {
            return;
        };
        if state.window.id() != id {
            return;
        }

        match event {
            WindowEvent::CloseRequested
            | WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        logical_key: Key::Named(NamedKey::Escape),
                        state: ElementState::Pressed,
                        ..
                    },
                ..
            } => event_loop.exit(),
            WindowEvent::Resized(size) => state.resize(size),
            WindowEvent::RedrawRequested => {
                match state.render() {
                    Ok(()) => {}
                    Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                        let size = state.window.inner_size();
                        state.resize(size);
                    }
                    Err(err) => log::error!("render failed: {err}"),
                }
                state.window.request_redraw();
            }
            _ => {}
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(state) = self.state.as_mut() {
            state.shutdown();
        }
    }
}

fn main() -> Result<(), winit::error::EventLoopError> {
    deferred3d::init_logging();

    let Some(model_path) = std::env::args().nth(1) else {
        eprintln!("usage: deferred_basic <model.gltf>");
        return Ok(());
    };

    let event_loop = EventLoop::new()?;
    let mut app = DemoApp {
        settings: Settings::load(),
        model_path,
        state: None,
    };
    event_loop.run_app(&mut app)
}
