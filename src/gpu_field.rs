// particle-field - GPU Particle Field Background
// Copyright (c) 2025 Filipe da Veiga Ventura Alves
// Licensed under MIT License

//! wgpu implementation of the particle field: three compute passes over
//! double-buffered `Rgba32Float` textures followed by a fullscreen present
//! pass into a window surface or an offscreen RGBA8 texture.

use bytemuck::{Pod, Zeroable};
use std::sync::Arc;
use winit::window::Window;

use crate::backend::{to_display_pixel, validate_size, FieldBackend, FrameInputs};
use crate::error::{EngineError, Result};
use crate::field::{FieldSize, NeighborSlots, Particle, PingPong};
use crate::settings::FieldSettings;

const WORKGROUP_SIZE: u32 = 16;
const FIELD_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba32Float;
const OFFSCREEN_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;
const FIELD_TEXEL_BYTES: u32 = 16;
const DISPLAY_TEXEL_BYTES: u32 = 4;

#[repr(C)]
#[derive(Debug, Copy, Clone, Pod, Zeroable)]
struct FieldParams {
    resolution: [f32; 2],
    frame: u32,
    time: f32,
    seeding: u32,
    probe_count: u32,
    instance_seed: u32,
    repulsion_min: f32,
    repulsion_range: f32,
    repulsion_falloff: f32,
    repulsion_scale: f32,
    viscosity: f32,
    target_speed: f32,
    speed_relax: f32,
    noise_scale: f32,
    blob_gain: f32,
    trail_retention: f32,
    _pad: [u32; 3],
    palette: [[f32; 4]; 3],
}

// Must match `FieldParams` in shaders/common.wgsl
const _: [(); 128] = [(); std::mem::size_of::<FieldParams>()];

impl FieldParams {
    fn new(size: FieldSize, settings: &FieldSettings, inputs: FrameInputs, instance_seed: u32) -> Self {
        let stop = |c: [f32; 3]| [c[0], c[1], c[2], 1.0];
        Self {
            resolution: size.extent(),
            frame: inputs.frame,
            time: inputs.time,
            seeding: inputs.seeding as u32,
            probe_count: settings.probe_count(size.width, size.height),
            instance_seed,
            repulsion_min: settings.repulsion_min,
            repulsion_range: settings.repulsion_range,
            repulsion_falloff: settings.repulsion_falloff,
            repulsion_scale: settings.repulsion_scale,
            viscosity: settings.viscosity,
            target_speed: settings.target_speed,
            speed_relax: settings.speed_relax,
            noise_scale: settings.noise_scale,
            blob_gain: settings.blob_gain,
            trail_retention: settings.trail_retention,
            _pad: [0; 3],
            palette: settings.palette.map(stop),
        }
    }
}

/// Bytes per row of a texture copy, padded to wgpu's copy alignment.
pub fn padded_bytes_per_row(width: u32, bytes_per_texel: u32) -> u32 {
    let unpadded = width * bytes_per_texel;
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    (unpadded + align - 1) / align * align
}

/// Instance, adapter, device and queue.
pub struct GpuContext {
    pub instance: wgpu::Instance,
    pub adapter: wgpu::Adapter,
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
}

impl GpuContext {
    fn new_instance() -> wgpu::Instance {
        wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        })
    }

    fn request(instance: wgpu::Instance, surface: Option<&wgpu::Surface<'_>>) -> Result<Self> {
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: surface,
            force_fallback_adapter: false,
        }))
        .ok_or_else(|| EngineError::ContextUnavailable("no compatible GPU adapter".into()))?;

        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("Particle Field Device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::downlevel_defaults()
                    .using_resolution(adapter.limits()),
                memory_hints: Default::default(),
            },
            None,
        ))
        .map_err(|e| EngineError::ContextUnavailable(e.to_string()))?;

        // Errors outside an error scope are logged instead of aborting the host.
        device.on_uncaptured_error(Box::new(|err| {
            log::error!("uncaptured wgpu error: {}", err);
        }));

        let info = adapter.get_info();
        log::info!("GPU adapter: {} ({:?})", info.name, info.backend);

        Ok(Self {
            instance,
            adapter,
            device,
            queue,
        })
    }
}

enum PresentTarget {
    Surface {
        surface: wgpu::Surface<'static>,
        config: wgpu::SurfaceConfiguration,
    },
    Offscreen,
}

impl PresentTarget {
    fn format(&self) -> wgpu::TextureFormat {
        match self {
            PresentTarget::Surface { config, .. } => config.format,
            PresentTarget::Offscreen => OFFSCREEN_FORMAT,
        }
    }
}

struct Pipelines {
    update: wgpu::ComputePipeline,
    neighbors: wgpu::ComputePipeline,
    blend: wgpu::ComputePipeline,
    present: wgpu::RenderPipeline,
    update_layout: wgpu::BindGroupLayout,
    neighbors_layout: wgpu::BindGroupLayout,
    blend_layout: wgpu::BindGroupLayout,
    present_layout: wgpu::BindGroupLayout,
}

fn params_entry() -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding: 0,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn sampled_entry(binding: u32, visibility: wgpu::ShaderStages) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility,
        ty: wgpu::BindingType::Texture {
            sample_type: wgpu::TextureSampleType::Float { filterable: false },
            view_dimension: wgpu::TextureViewDimension::D2,
            multisampled: false,
        },
        count: None,
    }
}

fn storage_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::StorageTexture {
            access: wgpu::StorageTextureAccess::WriteOnly,
            format: FIELD_FORMAT,
            view_dimension: wgpu::TextureViewDimension::D2,
        },
        count: None,
    }
}

fn compute_pipeline(
    device: &wgpu::Device,
    label: &str,
    source: String,
    entry_point: &str,
    layout: &wgpu::BindGroupLayout,
) -> wgpu::ComputePipeline {
    let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(label),
        source: wgpu::ShaderSource::Wgsl(source.into()),
    });
    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(label),
        bind_group_layouts: &[layout],
        push_constant_ranges: &[],
    });
    device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
        label: Some(label),
        layout: Some(&pipeline_layout),
        module: &module,
        entry_point,
        compilation_options: Default::default(),
        cache: None,
    })
}

impl Pipelines {
    fn new(device: &wgpu::Device, present_format: wgpu::TextureFormat) -> Self {
        let common = include_str!("../shaders/common.wgsl");
        let compute = wgpu::ShaderStages::COMPUTE;

        let update_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Update Particles Layout"),
            entries: &[
                params_entry(),
                sampled_entry(1, compute),
                sampled_entry(2, compute),
                storage_entry(3),
            ],
        });
        let neighbors_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Rebuild Neighbors Layout"),
            entries: &[
                params_entry(),
                sampled_entry(1, compute),
                sampled_entry(2, compute),
                storage_entry(3),
            ],
        });
        let blend_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Blend Accumulator Layout"),
            entries: &[
                params_entry(),
                sampled_entry(1, compute),
                sampled_entry(2, compute),
                sampled_entry(3, compute),
                storage_entry(4),
            ],
        });
        let present_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Present Layout"),
            entries: &[sampled_entry(0, wgpu::ShaderStages::FRAGMENT)],
        });

        let update = compute_pipeline(
            device,
            "Update Particles Pipeline",
            format!("{}\n{}", common, include_str!("../shaders/update.wgsl")),
            "update_particles",
            &update_layout,
        );
        let neighbors = compute_pipeline(
            device,
            "Rebuild Neighbors Pipeline",
            format!("{}\n{}", common, include_str!("../shaders/neighbors.wgsl")),
            "rebuild_neighbors",
            &neighbors_layout,
        );
        let blend = compute_pipeline(
            device,
            "Blend Accumulator Pipeline",
            format!("{}\n{}", common, include_str!("../shaders/blend.wgsl")),
            "blend_accumulator",
            &blend_layout,
        );

        let present_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Present Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("../shaders/present.wgsl").into()),
        });
        let present_pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Present Pipeline Layout"),
            bind_group_layouts: &[&present_layout],
            push_constant_ranges: &[],
        });
        let present = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Present Pipeline"),
            layout: Some(&present_pipeline_layout),
            vertex: wgpu::VertexState {
                module: &present_shader,
                entry_point: "vs_main",
                buffers: &[],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &present_shader,
                entry_point: "fs_main",
                targets: &[Some(wgpu::ColorTargetState {
                    format: present_format,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState::default(),
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        Self {
            update,
            neighbors,
            blend,
            present,
            update_layout,
            neighbors_layout,
            blend_layout,
            present_layout,
        }
    }
}

/// One side of the double buffer.
struct TextureSet {
    particles: wgpu::Texture,
    neighbors: wgpu::Texture,
    accumulator: wgpu::Texture,
    particles_view: wgpu::TextureView,
    neighbors_view: wgpu::TextureView,
    accumulator_view: wgpu::TextureView,
}

fn field_texture(device: &wgpu::Device, label: &str, size: FieldSize) -> wgpu::Texture {
    device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size: wgpu::Extent3d {
            width: size.width,
            height: size.height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: FIELD_FORMAT,
        usage: wgpu::TextureUsages::STORAGE_BINDING
            | wgpu::TextureUsages::TEXTURE_BINDING
            | wgpu::TextureUsages::COPY_SRC,
        view_formats: &[],
    })
}

impl TextureSet {
    fn new(device: &wgpu::Device, size: FieldSize, side: &str) -> Self {
        let particles = field_texture(device, &format!("Particles {}", side), size);
        let neighbors = field_texture(device, &format!("Neighbors {}", side), size);
        let accumulator = field_texture(device, &format!("Accumulator {}", side), size);
        let view = |t: &wgpu::Texture| t.create_view(&wgpu::TextureViewDescriptor::default());
        Self {
            particles_view: view(&particles),
            neighbors_view: view(&neighbors),
            accumulator_view: view(&accumulator),
            particles,
            neighbors,
            accumulator,
        }
    }

    fn destroy(&self) {
        self.particles.destroy();
        self.neighbors.destroy();
        self.accumulator.destroy();
    }
}

/// Size-dependent resources. Bind groups are indexed by the parity of the
/// texture set written in a frame.
struct FieldTargets {
    sets: PingPong<TextureSet>,
    update_groups: [wgpu::BindGroup; 2],
    neighbors_groups: [wgpu::BindGroup; 2],
    blend_groups: [wgpu::BindGroup; 2],
    present_groups: [wgpu::BindGroup; 2],
    display: Option<(wgpu::Texture, wgpu::TextureView)>,
}

fn texture(binding: u32, view: &wgpu::TextureView) -> wgpu::BindGroupEntry<'_> {
    wgpu::BindGroupEntry {
        binding,
        resource: wgpu::BindingResource::TextureView(view),
    }
}

impl FieldTargets {
    fn new(
        device: &wgpu::Device,
        pipelines: &Pipelines,
        params_buffer: &wgpu::Buffer,
        size: FieldSize,
        offscreen: bool,
    ) -> Self {
        let sets = [TextureSet::new(device, size, "A"), TextureSet::new(device, size, "B")];
        let params = wgpu::BindGroupEntry {
            binding: 0,
            resource: params_buffer.as_entire_binding(),
        };

        let update_groups = [0usize, 1].map(|p| {
            let (out, prev) = (&sets[p], &sets[p ^ 1]);
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Update Particles Bind Group"),
                layout: &pipelines.update_layout,
                entries: &[
                    params.clone(),
                    texture(1, &prev.particles_view),
                    texture(2, &prev.neighbors_view),
                    texture(3, &out.particles_view),
                ],
            })
        });
        let neighbors_groups = [0usize, 1].map(|p| {
            let (out, prev) = (&sets[p], &sets[p ^ 1]);
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Rebuild Neighbors Bind Group"),
                layout: &pipelines.neighbors_layout,
                entries: &[
                    params.clone(),
                    texture(1, &prev.neighbors_view),
                    texture(2, &out.particles_view),
                    texture(3, &out.neighbors_view),
                ],
            })
        });
        let blend_groups = [0usize, 1].map(|p| {
            let (out, prev) = (&sets[p], &sets[p ^ 1]);
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Blend Accumulator Bind Group"),
                layout: &pipelines.blend_layout,
                entries: &[
                    params.clone(),
                    texture(1, &out.neighbors_view),
                    texture(2, &out.particles_view),
                    texture(3, &prev.accumulator_view),
                    texture(4, &out.accumulator_view),
                ],
            })
        });
        let present_groups = [0usize, 1].map(|p| {
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Present Bind Group"),
                layout: &pipelines.present_layout,
                entries: &[texture(0, &sets[p].accumulator_view)],
            })
        });

        let display = offscreen.then(|| {
            let texture = device.create_texture(&wgpu::TextureDescriptor {
                label: Some("Offscreen Display"),
                size: wgpu::Extent3d {
                    width: size.width,
                    height: size.height,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: OFFSCREEN_FORMAT,
                usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
                view_formats: &[],
            });
            let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
            (texture, view)
        });

        let [a, b] = sets;
        Self {
            sets: PingPong::new(a, b),
            update_groups,
            neighbors_groups,
            blend_groups,
            present_groups,
            display,
        }
    }

    fn destroy(&self) {
        for set in self.sets.iter() {
            set.destroy();
        }
        if let Some((texture, _)) = &self.display {
            texture.destroy();
        }
    }
}

/// Runs `f` inside out-of-memory and validation error scopes.
fn scoped<T>(device: &wgpu::Device, f: impl FnOnce() -> T) -> std::result::Result<T, wgpu::Error> {
    device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let value = f();
    let validation = pollster::block_on(device.pop_error_scope());
    let out_of_memory = pollster::block_on(device.pop_error_scope());
    match out_of_memory.or(validation) {
        Some(err) => Err(err),
        None => Ok(value),
    }
}

/// Everything tied to the device. Fields drop in declaration order, so the
/// surface goes before the context that created it.
struct GpuResources {
    target: PresentTarget,
    targets: FieldTargets,
    pipelines: Pipelines,
    params_buffer: wgpu::Buffer,
    context: GpuContext,
}

impl GpuResources {
    fn allocate_targets(&self, size: FieldSize) -> Result<FieldTargets> {
        allocate_targets(
            &self.context,
            &self.pipelines,
            &self.params_buffer,
            &self.target,
            size,
        )
    }

    fn configure_surface(&mut self, size: FieldSize) {
        if let PresentTarget::Surface { surface, config } = &mut self.target {
            config.width = size.width;
            config.height = size.height;
            surface.configure(&self.context.device, config);
        }
    }
}

fn allocate_targets(
    context: &GpuContext,
    pipelines: &Pipelines,
    params_buffer: &wgpu::Buffer,
    target: &PresentTarget,
    size: FieldSize,
) -> Result<FieldTargets> {
    let max_dim = context.device.limits().max_texture_dimension_2d;
    if size.width > max_dim || size.height > max_dim {
        return Err(EngineError::Allocation(format!(
            "{}x{} exceeds the device texture limit of {}",
            size.width, size.height, max_dim
        )));
    }

    let device = &context.device;
    let offscreen = matches!(target, PresentTarget::Offscreen);
    scoped(device, || {
        FieldTargets::new(device, pipelines, params_buffer, size, offscreen)
    })
    .map_err(|e| EngineError::Allocation(e.to_string()))
}

impl GpuContext {
    fn read_texture(&self, texture: &wgpu::Texture, size: FieldSize, bytes_per_texel: u32) -> Result<Vec<u8>> {
        let (width, height) = (size.width, size.height);
        let unpadded = width * bytes_per_texel;
        let padded = padded_bytes_per_row(width, bytes_per_texel);
        let device = &self.device;

        let staging_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Field Readback"),
            size: padded as u64 * height as u64,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Field Readback Encoder"),
        });
        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyBuffer {
                buffer: &staging_buffer,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(padded),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(Some(encoder.finish()));

        let buffer_slice = staging_buffer.slice(..);
        let (sender, receiver) = futures_intrusive::channel::shared::oneshot_channel();
        buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        device.poll(wgpu::Maintain::Wait);
        match pollster::block_on(receiver.receive()) {
            Some(Ok(())) => {}
            Some(Err(e)) => return Err(EngineError::Readback(e.to_string())),
            None => return Err(EngineError::Readback("map callback dropped".into())),
        }

        let mut bytes = Vec::with_capacity(unpadded as usize * height as usize);
        {
            let data = buffer_slice.get_mapped_range();
            for row in data.chunks(padded as usize) {
                bytes.extend_from_slice(&row[..unpadded as usize]);
            }
        }
        staging_buffer.unmap();
        staging_buffer.destroy();
        Ok(bytes)
    }
}

pub struct GpuField {
    settings: FieldSettings,
    instance_seed: u32,
    size: FieldSize,
    submitted_frames: u64,
    /// `None` once released.
    resources: Option<GpuResources>,
}

impl GpuField {
    /// Field presenting into `window`'s surface.
    pub fn with_surface(window: Arc<Window>, width: u32, height: u32, settings: FieldSettings) -> Result<Self> {
        let size = FieldSize::new(width, height);
        validate_size(size)?;

        let instance = GpuContext::new_instance();
        let surface = instance
            .create_surface(window)
            .map_err(|e| EngineError::ContextUnavailable(e.to_string()))?;
        let context = GpuContext::request(instance, Some(&surface))?;

        let caps = surface.get_capabilities(&context.adapter);
        // the present pass is an identity copy; an sRGB target would re-encode it
        let format = caps
            .formats
            .iter()
            .copied()
            .find(|f| !f.is_srgb())
            .or_else(|| caps.formats.first().copied())
            .ok_or_else(|| EngineError::ContextUnavailable("surface has no formats".into()))?;
        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width,
            height,
            present_mode: wgpu::PresentMode::Fifo,
            alpha_mode: caps.alpha_modes.first().copied().unwrap_or(wgpu::CompositeAlphaMode::Auto),
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };

        Self::build(context, PresentTarget::Surface { surface, config }, size, settings)
    }

    /// Field rendering into an offscreen RGBA8 texture.
    pub fn headless(width: u32, height: u32, settings: FieldSettings) -> Result<Self> {
        let size = FieldSize::new(width, height);
        validate_size(size)?;
        let context = GpuContext::request(GpuContext::new_instance(), None)?;
        Self::build(context, PresentTarget::Offscreen, size, settings)
    }

    fn build(context: GpuContext, target: PresentTarget, size: FieldSize, settings: FieldSettings) -> Result<Self> {
        let mut settings = settings;
        settings.sanitize();
        let instance_seed = settings.seed.unwrap_or_else(rand::random);

        let device = &context.device;
        let pipelines = scoped(device, || Pipelines::new(device, target.format()))
            .map_err(|e| EngineError::ContextUnavailable(format!("pipeline creation failed: {}", e)))?;
        let params_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Field Params"),
            size: std::mem::size_of::<FieldParams>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let targets = allocate_targets(&context, &pipelines, &params_buffer, &target, size)?;

        let mut resources = GpuResources {
            target,
            targets,
            pipelines,
            params_buffer,
            context,
        };
        resources.configure_surface(size);

        log::info!(
            "GPU particle field {}x{} ({} probe ids)",
            size.width,
            size.height,
            settings.probe_count(size.width, size.height)
        );
        Ok(Self {
            settings,
            instance_seed,
            size,
            submitted_frames: 0,
            resources: Some(resources),
        })
    }

    pub fn settings(&self) -> &FieldSettings {
        &self.settings
    }

    pub fn instance_seed(&self) -> u32 {
        self.instance_seed
    }

    /// Device and queue, or `None` after release.
    pub fn context(&self) -> Option<&GpuContext> {
        self.resources.as_ref().map(|r| &r.context)
    }

    fn resources(&self) -> Result<&GpuResources> {
        self.resources.as_ref().ok_or(EngineError::Disposed)
    }

    fn read_field(&self, pick: impl Fn(&TextureSet) -> &wgpu::Texture) -> Result<Vec<[f32; 4]>> {
        let resources = self.resources()?;
        let texture = pick(resources.targets.sets.front());
        let bytes = resources.context.read_texture(texture, self.size, FIELD_TEXEL_BYTES)?;
        Ok(bytemuck::pod_collect_to_vec(&bytes))
    }
}

impl FieldBackend for GpuField {
    fn name(&self) -> &'static str {
        "gpu"
    }

    fn size(&self) -> FieldSize {
        self.size
    }

    fn resize(&mut self, size: FieldSize) -> Result<()> {
        validate_size(size)?;
        let resources = self.resources.as_mut().ok_or(EngineError::Disposed)?;
        let targets = resources.allocate_targets(size)?;
        resources.context.device.poll(wgpu::Maintain::Wait);
        let old = std::mem::replace(&mut resources.targets, targets);
        old.destroy();
        resources.configure_surface(size);
        self.size = size;
        Ok(())
    }

    fn render_frame(&mut self, inputs: FrameInputs) -> Result<()> {
        let GpuResources {
            target,
            targets,
            pipelines,
            params_buffer,
            context,
        } = self.resources.as_mut().ok_or(EngineError::Disposed)?;
        let device = &context.device;
        let queue = &context.queue;

        let frame = match &*target {
            PresentTarget::Surface { surface, config } => match surface.get_current_texture() {
                Ok(frame) => Some(frame),
                Err(err @ (wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated)) => {
                    log::warn!("surface {:?}; reconfiguring and skipping present", err);
                    surface.configure(device, config);
                    None
                }
                Err(wgpu::SurfaceError::Timeout) => {
                    log::warn!("surface timeout; skipping present");
                    None
                }
                Err(err) => return Err(err.into()),
            },
            PresentTarget::Offscreen => None,
        };

        let params = FieldParams::new(self.size, &self.settings, inputs, self.instance_seed);
        queue.write_buffer(params_buffer, 0, bytemuck::bytes_of(&params));

        targets.sets.swap();
        let p = targets.sets.parity();
        let groups_x = (self.size.width + WORKGROUP_SIZE - 1) / WORKGROUP_SIZE;
        let groups_y = (self.size.height + WORKGROUP_SIZE - 1) / WORKGROUP_SIZE;

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Particle Field Encoder"),
        });

        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Update Particles"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&pipelines.update);
            pass.set_bind_group(0, &targets.update_groups[p], &[]);
            pass.dispatch_workgroups(groups_x, groups_y, 1);
        }

        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Rebuild Neighbors"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&pipelines.neighbors);
            pass.set_bind_group(0, &targets.neighbors_groups[p], &[]);
            pass.dispatch_workgroups(groups_x, groups_y, 1);
        }

        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Blend Accumulator"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&pipelines.blend);
            pass.set_bind_group(0, &targets.blend_groups[p], &[]);
            pass.dispatch_workgroups(groups_x, groups_y, 1);
        }

        let surface_view = frame
            .as_ref()
            .map(|f| f.texture.create_view(&wgpu::TextureViewDescriptor::default()));
        let present_view = surface_view
            .as_ref()
            .or_else(|| targets.display.as_ref().map(|(_, view)| view));

        if let Some(view) = present_view {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Present"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            render_pass.set_pipeline(&pipelines.present);
            render_pass.set_bind_group(0, &targets.present_groups[p], &[]);
            render_pass.draw(0..6, 0..1);
        }

        queue.submit(Some(encoder.finish()));
        if let Some(frame) = frame {
            frame.present();
        }

        self.submitted_frames += 1;
        Ok(())
    }

    fn release(&mut self) {
        let Some(resources) = self.resources.take() else {
            return;
        };
        resources.context.device.poll(wgpu::Maintain::Wait);
        resources.targets.destroy();
        resources.params_buffer.destroy();
        // surface, pipelines, device and instance go with it
        drop(resources);
        log::info!("GPU particle field released after {} frames", self.submitted_frames);
    }

    fn is_released(&self) -> bool {
        self.resources.is_none()
    }

    fn submitted_frames(&self) -> u64 {
        self.submitted_frames
    }

    fn read_particles(&mut self) -> Result<Vec<Particle>> {
        let texels = self.read_field(|set| &set.particles)?;
        Ok(texels
            .into_iter()
            .map(|t| Particle {
                position: [t[0], t[1]],
                velocity: [t[2], t[3]],
            })
            .collect())
    }

    fn read_neighbors(&mut self) -> Result<Vec<NeighborSlots>> {
        let texels = self.read_field(|set| &set.neighbors)?;
        Ok(texels
            .into_iter()
            .map(|t| t.map(|id| (id + 0.5) as u32))
            .collect())
    }

    fn read_accumulator(&mut self) -> Result<Vec<[f32; 4]>> {
        self.read_field(|set| &set.accumulator)
    }

    fn read_display(&mut self) -> Result<Vec<u8>> {
        let resources = self.resources()?;
        if let Some((texture, _)) = &resources.targets.display {
            return resources.context.read_texture(texture, self.size, DISPLAY_TEXEL_BYTES);
        }
        // swapchain images cannot be read back; quantize the accumulator instead
        let accumulator = self.read_accumulator()?;
        Ok(accumulator.into_iter().flat_map(to_display_pixel).collect())
    }
}

impl Drop for GpuField {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copy_rows_are_aligned() {
        assert_eq!(padded_bytes_per_row(1, 16), 256);
        assert_eq!(padded_bytes_per_row(16, 16), 256);
        assert_eq!(padded_bytes_per_row(17, 16), 512);
        assert_eq!(padded_bytes_per_row(800, 4), 3328);
    }

    #[test]
    fn params_carry_settings_and_frame_inputs() {
        let settings = FieldSettings::default();
        let inputs = FrameInputs {
            frame: 7,
            seeding: false,
            time: 1.5,
        };
        let params = FieldParams::new(FieldSize::new(800, 600), &settings, inputs, 99);
        assert_eq!(params.resolution, [800.0, 600.0]);
        assert_eq!(params.frame, 7);
        assert_eq!(params.seeding, 0);
        assert_eq!(params.probe_count, 48_000);
        assert_eq!(params.instance_seed, 99);
        assert_eq!(params.palette[1][3], 1.0);
        assert_eq!(params.palette[2][0], settings.palette[2][0]);
    }
}
