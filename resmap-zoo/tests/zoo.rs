use rmc::{
    error::ErrorKind,
    inspect::{DrawReport, Mapping, StageReport},
    resolve::EmptyReason,
    view::ViewRange,
};
use rmt::{DescriptorKind, IndexSource, Limits, ShaderStages, TextureFormat};
use resmap_zoo::{scenario::LITTER, Zoo, ZooConfig, ZooError, ZooReport, MARKERS};

fn report() -> ZooReport {
    let _ = env_logger::try_init();
    let zoo = Zoo::build(&ZooConfig::default()).unwrap();
    ZooReport::generate(&zoo, None)
}

fn pixel<'a>(report: &'a ZooReport, marker: &str) -> &'a StageReport {
    report
        .draw(marker)
        .and_then(|draw| draw.stage(ShaderStages::PIXEL))
        .unwrap()
}

fn slots(stage: &StageReport, name: &str) -> Vec<Option<u32>> {
    stage
        .binding(name)
        .unwrap()
        .elements
        .iter()
        .map(|element| element.mapping.slot())
        .collect()
}

fn resource<'a>(stage: &'a StageReport, name: &str, element: usize) -> Option<&'a str> {
    stage.binding(name).unwrap().elements[element]
        .mapping
        .resource()
}

fn assert_inline_consts(stage: &StageReport) {
    let consts = stage.binding("consts").unwrap();
    assert_eq!(
        consts.elements[0].mapping,
        Mapping::Inline {
            root_index: 0,
            resource: "cb".to_string(),
            offset: 0,
        }
    );
}

#[test]
fn draws_are_recorded_in_order() {
    let report = report();
    let markers = report
        .draws
        .iter()
        .map(|draw| draw.marker.as_deref().unwrap())
        .collect::<Vec<_>>();
    assert_eq!(markers, MARKERS);
    for draw in report.draws.iter() {
        assert_eq!(draw.render_targets.len(), 1);
        assert_eq!(draw.render_targets[0].slot, 1);
        assert_eq!(draw.render_targets[0].resource.as_deref(), Some("rtvtex"));
        assert_eq!(draw.render_targets[0].format, Some(TextureFormat::Rgba32Float));
    }
    assert_eq!(report.device.views.populated_end, LITTER.end);
    assert_eq!(report.device.render_targets.occupied, 2);
}

#[test]
fn shader_model_5_0() {
    let report = report();
    let stage = pixel(&report, "sm_5_0");
    assert_inline_consts(stage);
    assert_eq!(slots(stage, "res1"), [Some(56)]);
    assert_eq!(resource(stage, "res1", 0), Some("res1"));
    assert_eq!(slots(stage, "res2"), [Some(57)]);
    assert_eq!(resource(stage, "res2", 0), Some("res2"));
}

#[test]
fn shader_model_5_1() {
    let report = report();
    let stage = pixel(&report, "sm_5_1");
    assert_inline_consts(stage);
    // t6 and t7 through the unbounded table starting at slot 50
    assert_eq!(slots(stage, "res1"), [Some(56)]);
    assert_eq!(slots(stage, "res2"), [Some(57)]);

    let bar = stage.binding("bar").unwrap();
    assert_eq!(bar.elements.len(), 12);
    for (i, element) in bar.elements.iter().enumerate() {
        match element.mapping {
            Mapping::Descriptor {
                root_index,
                slot,
                kind,
                ref resource,
                range,
            } => {
                assert_eq!(root_index, 1);
                assert_eq!(slot, i as u32);
                assert_eq!(kind, DescriptorKind::Cbv);
                assert_eq!(resource, "cbArray");
                assert_eq!(
                    range,
                    ViewRange::Bytes {
                        offset: i as u64 * 256,
                        size: 256
                    }
                );
            }
            ref other => panic!("bar[{i}] resolved to {other:?}"),
        }
    }

    let access = stage.accesses_of("bar").next().unwrap();
    assert_eq!(access.indices.as_slice(), &[5]);
    assert!(matches!(
        access.elements[0].mapping,
        Mapping::Descriptor {
            slot: 5,
            range: ViewRange::Bytes { offset: 1280, .. },
            ..
        }
    ));
}

fn assert_array_accesses(stage: &StageReport, base: u32) {
    let accesses = stage.accesses_of("resArray").collect::<Vec<_>>();
    assert_eq!(accesses.len(), 3);

    assert_eq!(accesses[0].source, IndexSource::Constant);
    assert_eq!(accesses[0].elements[0].mapping.slot(), Some(base + 1));

    // test.x of cbuffer {3, 50, 75, 100}
    assert_eq!(accesses[1].source, IndexSource::Uniform);
    assert_eq!(accesses[1].indices.as_slice(), &[3]);
    assert_eq!(accesses[1].elements[0].mapping.slot(), Some(base + 3));

    assert_eq!(accesses[2].source, IndexSource::NonUniform);
    let lanes = accesses[2]
        .elements
        .iter()
        .map(|element| element.mapping.slot())
        .collect::<Vec<_>>();
    assert_eq!(lanes, (0..4).map(|i| Some(base + i)).collect::<Vec<_>>());
}

#[test]
fn resource_array_in_space1() {
    let report = report();
    let stage = pixel(&report, "ResArray");
    assert_inline_consts(stage);
    let binding = stage.binding("resArray").unwrap();
    assert_eq!(binding.binding.to_string(), "t10, space1");
    assert_eq!(slots(stage, "resArray"), [Some(30), Some(31), Some(32), Some(33)]);
    assert!(matches!(
        binding.elements[2].mapping,
        Mapping::Descriptor {
            range: ViewRange::Texture {
                format: TextureFormat::R32Float,
                slice_count: 4,
                ..
            },
            ..
        }
    ));
    assert_array_accesses(stage, 30);
}

#[test]
fn bindless_reports_every_written_slot() {
    let report = report();
    let stage = pixel(&report, "Bindless");
    assert_inline_consts(stage);
    let binding = stage.binding("resArray").unwrap();
    assert!(binding.error.is_none());

    // 4 array textures, res1, res2 and the litter
    let expected = 4 + 2 + LITTER.len();
    assert_eq!(binding.elements.len(), expected);
    let first = binding.elements.first().unwrap();
    assert_eq!((first.index, first.mapping.slot()), (0, Some(30)));
    let res1 = &binding.elements[4];
    assert_eq!((res1.index, res1.mapping.slot()), (26, Some(56)));
    let last = binding.elements.last().unwrap();
    assert_eq!((last.index, last.mapping.slot()), (9969, Some(9999)));
    assert_eq!(last.mapping.resource(), Some("res2"));

    assert_array_accesses(stage, 30);
}

#[test]
fn smaller_heap_clips_the_litter() {
    let _ = env_logger::try_init();
    let zoo = Zoo::build(&ZooConfig {
        limits: Limits::with_heap_capacity(2048),
        ..ZooConfig::default()
    })
    .unwrap();
    let report = ZooReport::generate(&zoo, Some("Bindless"));
    assert_eq!(report.draws.len(), 1);
    let bindless: &DrawReport = &report.draws[0];
    let binding = bindless
        .stage(ShaderStages::PIXEL)
        .and_then(|stage| stage.binding("resArray"))
        .unwrap();
    assert_eq!(binding.elements.len(), 4 + 2 + 1024);
    assert_eq!(binding.elements.last().unwrap().mapping.slot(), Some(2047));
}

#[test]
fn tiny_heap_fails_with_capacity_exceeded() {
    let err = Zoo::build(&ZooConfig {
        limits: Limits::with_heap_capacity(40),
        ..ZooConfig::default()
    })
    .unwrap_err();
    match err {
        ZooError::View(ref inner) => {
            use rmc::error::Classify;
            assert_eq!(inner.kind(), ErrorKind::CapacityExceeded);
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn zero_constant_buffer_alignment_is_rejected() {
    let err = Zoo::build(&ZooConfig {
        limits: Limits {
            constant_buffer_alignment: 0,
            ..Limits::default()
        },
        ..ZooConfig::default()
    })
    .unwrap_err();
    assert!(matches!(
        err,
        ZooError::Device(rmc::DeviceError::LimitsExceeded {
            name: "constant_buffer_alignment",
            value: 0,
        })
    ));
    assert!(err.to_string().contains("constant_buffer_alignment"));
}

#[test]
fn empty_slots_past_the_litter() {
    let _ = env_logger::try_init();
    let zoo = Zoo::build(&ZooConfig::default()).unwrap();
    let draw = zoo.commands.find_draw("Bindless").unwrap();
    let heap = zoo.device.views();
    let resolved = rmc::resolve(
        &draw.root_signature,
        &draw.arguments,
        Some(&*heap),
        &rmc::BindingQuery::new(rmt::DescriptorRangeType::Srv, 0, 0, 9970)
            .stage(ShaderStages::PIXEL),
    )
    .unwrap();
    assert!(matches!(
        resolved,
        rmc::ResolvedBinding::Empty {
            slot: 10_000,
            reason: EmptyReason::OutOfRange,
            ..
        }
    ));
}

#[test]
fn json_round_trip_keeps_the_mappings() {
    let report = report();
    let mut json = Vec::new();
    report.clone().into_json(&mut json).unwrap();
    let parsed = ZooReport::from_json(std::str::from_utf8(&json).unwrap()).unwrap();
    assert_eq!(parsed.draws, report.draws);
    assert_eq!(parsed.device, report.device);
}

#[test]
fn human_output_collapses_the_litter() {
    let report = report();
    let mut text = Vec::new();
    resmap_zoo::human::print_report(&mut text, &report).unwrap();
    let text = String::from_utf8(text).unwrap();
    assert!(text.contains("Draw Bindless:"));
    assert!(text.contains("resArray[994..=9969] -> slots 1024..=9999: `res2` (8976 aliases)"));
    assert!(text.contains("bar[5] -> root 1, slot 5: Cbv `cbArray` bytes 1280..1536"));
}
