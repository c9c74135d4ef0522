use std::sync::Arc;

use rmc::{
    binding_model::{InlineDescriptor, LayoutError, TableRange},
    command::CommandError,
    pipeline::{CreatePipelineError, IndexExpr, Pipeline, PipelineDescriptor, ShaderInterface},
    resource::{BufferDescriptor, ResourceError, TextureDescriptor},
    view::{CreateViewError, TextureSubresourceRange, ViewDesc},
    CommandList, Device, DeviceDescriptor, DeviceError, ResourceId, RootBindingLayout,
    RootParameter, RootSignature,
};
use rmt::{
    DescriptorCount, DescriptorHeapType, DescriptorIndex, DescriptorRangeType, Limits,
    RegisterSpace, ResourceStates, ShaderRegister, ShaderStages, TextureFormat,
    UNBOUNDED_DESCRIPTOR_COUNT,
};
use thiserror::Error;

/// Marker of each draw, in recording order.
pub const MARKERS: [&str; 4] = ["sm_5_0", "sm_5_1", "ResArray", "Bindless"];

/// First and one-past-last slot holding aliases of `res2`.
pub const LITTER: std::ops::Range<DescriptorIndex> = 1024..10_000;

const CBUFFER_DATA: [u32; 4] = [3, 50, 75, 100];
/// Constant buffer array entries are padded to the view alignment.
const ALIGNED_CB_SIZE: u64 = 256;

#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum ZooError {
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error(transparent)]
    Resource(#[from] ResourceError),
    #[error(transparent)]
    View(#[from] CreateViewError),
    #[error(transparent)]
    Layout(#[from] LayoutError),
    #[error(transparent)]
    Pipeline(#[from] CreatePipelineError),
    #[error(transparent)]
    Command(#[from] CommandError),
}

/// Knobs of the scenario.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ZooConfig {
    pub limits: Limits,
    pub screen_width: u32,
    pub screen_height: u32,
}

impl Default for ZooConfig {
    fn default() -> Self {
        Self {
            limits: Limits::default(),
            screen_width: 400,
            screen_height: 300,
        }
    }
}

fn u32_from_env(name: &str) -> Option<u32> {
    let value = std::env::var(name).ok()?;
    match value.trim().parse() {
        Ok(value) => Some(value),
        Err(err) => {
            log::warn!("Ignoring {}={:?}: {}", name, value, err);
            None
        }
    }
}

/// Get the shader visible heap size from the environment variable RESMAP_HEAP_CAPACITY
pub fn heap_capacity_from_env() -> Option<u32> {
    u32_from_env("RESMAP_HEAP_CAPACITY")
}

/// Get the render target heap size from the environment variable RESMAP_RTV_CAPACITY
pub fn rtv_capacity_from_env() -> Option<u32> {
    u32_from_env("RESMAP_RTV_CAPACITY")
}

impl ZooConfig {
    /// Default configuration with the heap sizes overridden from the environment.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(capacity) = heap_capacity_from_env() {
            config.limits.cbv_srv_uav_heap_capacity = capacity;
        }
        if let Some(capacity) = rtv_capacity_from_env() {
            config.limits.rtv_heap_capacity = capacity;
        }
        config
    }
}

#[derive(Clone, Copy, Debug)]
pub struct ZooResources {
    pub vertex_buffer: ResourceId,
    pub cbuffer: ResourceId,
    pub cbuffer_array: ResourceId,
    pub res1: ResourceId,
    pub res2: ResourceId,
    pub res_array: [ResourceId; 4],
    pub backbuffer: ResourceId,
    pub offscreen: ResourceId,
}

/// The device, resources and recorded draws of the zoo.
#[derive(Debug)]
pub struct Zoo {
    pub device: Device,
    pub resources: ZooResources,
    pub commands: CommandList,
}

fn bytes_of_f32(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|value| value.to_le_bytes()).collect()
}

fn pixel_cbv(space: RegisterSpace, register: ShaderRegister) -> RootParameter {
    RootParameter::Inline(InlineDescriptor {
        visibility: ShaderStages::PIXEL,
        range_type: DescriptorRangeType::Cbv,
        space,
        register,
    })
}

fn pixel_table(
    range_type: DescriptorRangeType,
    space: RegisterSpace,
    base_register: ShaderRegister,
    count: u32,
    table_offset: DescriptorIndex,
) -> RootParameter {
    RootParameter::Table(TableRange {
        visibility: ShaderStages::PIXEL,
        range_type,
        space,
        base_register,
        count: DescriptorCount::from_raw(count),
        table_offset,
    })
}

fn layout(label: &str, parameters: &[RootParameter]) -> RootBindingLayout {
    let mut layout = RootBindingLayout::with_label(label);
    for &parameter in parameters {
        layout.add_parameter(parameter);
    }
    layout
}

/// `cbuffer consts : register(b3) { uint4 test; }`
fn consts(interface: ShaderInterface) -> ShaderInterface {
    interface.binding("consts", DescriptorRangeType::Cbv, 0, 3, 1)
}

/// The three ways the array shaders index `resArray`.
fn array_accesses(interface: ShaderInterface) -> ShaderInterface {
    interface
        .access("resArray", IndexExpr::Constant(1))
        .access(
            "resArray",
            IndexExpr::Uniform {
                space: 0,
                register: 3,
                component: 0,
            },
        )
        .access("resArray", IndexExpr::NonUniform(vec![0, 1, 2, 3]))
}

struct Signatures {
    sm_5_0: Arc<RootSignature>,
    sm_5_1: Arc<RootSignature>,
    res_array: Arc<RootSignature>,
    bindless: Arc<RootSignature>,
}

impl Signatures {
    fn new(device: &Device) -> Result<Self, LayoutError> {
        use DescriptorRangeType::{Cbv, Srv};

        Ok(Self {
            sm_5_0: device.create_root_signature(layout(
                "sig_5_0",
                &[
                    pixel_cbv(0, 3),
                    pixel_table(Srv, 0, 0, 1, 56),
                    pixel_table(Srv, 0, 2, 1, 57),
                ],
            ))?,
            sm_5_1: device.create_root_signature(layout(
                "sig_5_1",
                &[
                    pixel_cbv(0, 3),
                    pixel_table(Cbv, 0, 4, 12, 0),
                    pixel_table(Srv, 0, 0, UNBOUNDED_DESCRIPTOR_COUNT, 50),
                ],
            ))?,
            res_array: device.create_root_signature(layout(
                "sig_resArray",
                &[pixel_cbv(0, 3), pixel_table(Srv, 1, 10, 4, 30)],
            ))?,
            bindless: device.create_root_signature(layout(
                "sig_bindless",
                &[
                    pixel_cbv(0, 3),
                    pixel_table(Srv, 0, 0, UNBOUNDED_DESCRIPTOR_COUNT, 30),
                ],
            ))?,
        })
    }
}

fn pipeline(
    device: &Device,
    label: &str,
    signature: &Arc<RootSignature>,
    pixel: ShaderInterface,
) -> Result<Arc<Pipeline>, CreatePipelineError> {
    device.create_pipeline(&PipelineDescriptor {
        label: Some(label.into()),
        root_signature: Arc::clone(signature),
        // the default vertex shader binds nothing
        vertex: ShaderInterface::new(),
        pixel: Some(pixel),
        render_targets: &[TextureFormat::Rgba32Float],
    })
}

impl Zoo {
    pub fn build(config: &ZooConfig) -> Result<Self, ZooError> {
        use DescriptorRangeType::{Cbv, Srv};

        let device = Device::new(&DeviceDescriptor {
            label: Some("resource mapping zoo".into()),
            limits: config.limits.clone(),
        })?;

        let vertex_buffer = device.create_buffer_init(
            &BufferDescriptor::new(Some("vb"), 0),
            &bytes_of_f32(&[
                -0.5, -0.5, 0.0, 0.0, 1.0, 0.0, 1.0, 0.0, 0.0, //
                0.0, 0.5, 0.0, 0.0, 1.0, 0.0, 1.0, 0.0, 1.0, //
                0.5, -0.5, 0.0, 0.0, 1.0, 0.0, 1.0, 1.0, 0.0,
            ]),
        )?;
        let cbuffer = device.create_buffer_init(
            &BufferDescriptor::new(Some("cb"), 0),
            &CBUFFER_DATA
                .iter()
                .flat_map(|value| value.to_le_bytes())
                .collect::<Vec<_>>(),
        )?;

        // bar[4][3], one padded entry per element
        let mut array_data = vec![0u8; 12 * ALIGNED_CB_SIZE as usize];
        for x in 0..4 {
            for y in 0..3 {
                let start = (x * 3 + y) * ALIGNED_CB_SIZE as usize;
                let col = bytes_of_f32(&[x as f32, y as f32, 0.5, 0.5]);
                array_data[start..start + col.len()].copy_from_slice(&col);
            }
        }
        let cbuffer_array =
            device.create_buffer_init(&BufferDescriptor::new(Some("cbArray"), 0), &array_data)?;
        for i in 0..12 {
            device.create_view(
                cbuffer_array,
                &ViewDesc::cbv(i as u64 * ALIGNED_CB_SIZE, ALIGNED_CB_SIZE),
                Some(i),
            )?;
        }

        let copy_dest = |label: &str, format: TextureFormat, layers: u32| {
            device.create_texture(&TextureDescriptor {
                initial_state: ResourceStates::COPY_DEST,
                ..TextureDescriptor::new(Some(label), format, 2, 2).array(layers)
            })
        };
        let res1 = copy_dest("res1", TextureFormat::Rgba8Unorm, 1)?;
        device.create_view(res1, &ViewDesc::srv(), Some(56))?;
        let res2 = copy_dest("res2", TextureFormat::Rgba8Unorm, 1)?;
        device.create_view(res2, &ViewDesc::srv(), Some(57))?;

        // aliases of res2 give the unbounded tables plenty to report
        let capacity = device.limits().cbv_srv_uav_heap_capacity;
        let litter = LITTER.start..LITTER.end.min(capacity);
        for slot in litter.clone() {
            device.create_view(res2, &ViewDesc::srv(), Some(slot))?;
        }
        log::info!("Littered {} aliases of res2 from slot {}", litter.len(), litter.start);

        let mut res_array = [ResourceId::zip(0, 0); 4];
        for (i, slot) in res_array.iter_mut().enumerate() {
            let texture = copy_dest(&format!("resArray{i}"), TextureFormat::R32Float, 4)?;
            device.create_view(
                texture,
                &ViewDesc::srv_texture(TextureSubresourceRange::default().slices(0, 4)),
                Some(30 + i as DescriptorIndex),
            )?;
            let texels = (0..16).map(|j| (i + j) as f32).collect::<Vec<_>>();
            device.upload_texture(texture, &bytes_of_f32(&texels), 2 * 4)?;
            *slot = texture;
        }

        // 1/10..4/10 and 5/10..8/10 in UNORM
        device.upload_texture(res1, &[26u8, 51, 77, 102].repeat(4), 8)?;
        device.upload_texture(res2, &[128u8, 153, 179, 204].repeat(4), 8)?;

        let signatures = Signatures::new(&device)?;
        let pso_5_0 = pipeline(
            &device,
            "pso_5_0",
            &signatures.sm_5_0,
            consts(
                ShaderInterface::new()
                    .binding("res1", Srv, 0, 0, 1)
                    .binding("res2", Srv, 0, 2, 1),
            ),
        )?;
        let pso_5_1 = pipeline(
            &device,
            "pso_5_1",
            &signatures.sm_5_1,
            consts(
                ShaderInterface::new()
                    .binding("res1", Srv, 0, 6, 1)
                    .binding("res2", Srv, 0, 7, 1),
            )
            // ConstantBuffer<Foo> bar[4][3] flattens to 12, bar[1][2] is element 5
            .binding("bar", Cbv, 0, 4, 12)
            .access("bar", IndexExpr::Constant(5)),
        )?;
        let pso_res_array = pipeline(
            &device,
            "pso_resArray",
            &signatures.res_array,
            array_accesses(consts(ShaderInterface::new().binding(
                "resArray",
                Srv,
                1,
                10,
                4,
            ))),
        )?;
        let pso_bindless = pipeline(
            &device,
            "pso_bindless",
            &signatures.bindless,
            array_accesses(consts(ShaderInterface::new().binding(
                "resArray",
                Srv,
                0,
                0,
                UNBOUNDED_DESCRIPTOR_COUNT,
            ))),
        )?;

        for buffer in [vertex_buffer, cbuffer, cbuffer_array] {
            device.transition(
                buffer,
                None,
                ResourceStates::COMMON,
                ResourceStates::VERTEX_AND_CONSTANT_BUFFER,
            )?;
        }

        let backbuffer = device.create_texture(
            &TextureDescriptor::new(
                Some("backbuffer"),
                TextureFormat::Rgba8Unorm,
                config.screen_width,
                config.screen_height,
            )
            .render_target(),
        )?;
        let offscreen = device.create_texture(
            &TextureDescriptor::new(
                Some("rtvtex"),
                TextureFormat::Rgba32Float,
                config.screen_width,
                config.screen_height,
            )
            .render_target(),
        )?;
        device.create_view(
            backbuffer,
            &ViewDesc::RenderTarget(
                TextureSubresourceRange::default().format(TextureFormat::Rgba8UnormSrgb),
            ),
            Some(0),
        )?;
        let offscreen_rtv = device.create_rtv(offscreen, Some(1))?;

        let mut commands = CommandList::new("zoo");
        commands.set_render_targets(&[offscreen_rtv])?;
        let draws = [
            (MARKERS[0], &pso_5_0, &signatures.sm_5_0, 2),
            (MARKERS[1], &pso_5_1, &signatures.sm_5_1, 2),
            (MARKERS[2], &pso_res_array, &signatures.res_array, 1),
            (MARKERS[3], &pso_bindless, &signatures.bindless, 1),
        ];
        for (marker, pipeline, signature, tables) in draws {
            commands.set_marker(marker);
            commands.set_pipeline(pipeline);
            commands.set_root_signature(signature);
            commands.set_descriptor_heap(DescriptorHeapType::CbvSrvUav)?;
            commands.set_root_constant_buffer_view(&device, 0, cbuffer, 0)?;
            // every table starts at the beginning of the heap
            for index in 1..=tables {
                commands.set_root_descriptor_table(index, 0)?;
            }
            commands.draw(3, 1)?;
        }

        Ok(Self {
            device,
            resources: ZooResources {
                vertex_buffer,
                cbuffer,
                cbuffer_array,
                res1,
                res2,
                res_array,
                backbuffer,
                offscreen,
            },
            commands,
        })
    }
}
