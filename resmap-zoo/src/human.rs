use std::io;

use rmc::{
    inspect::{AccessReport, BindingReport, DrawReport, ElementReport, Mapping},
    view::ViewRange,
};
use rmt::{DescriptorCount, ShaderStages};

use crate::report::ZooReport;

fn is_alias(prev: &ElementReport, next: &ElementReport) -> bool {
    match (&prev.mapping, &next.mapping) {
        (
            &Mapping::Descriptor {
                slot: prev_slot,
                kind: prev_kind,
                resource: ref prev_resource,
                range: ref prev_range,
                ..
            },
            &Mapping::Descriptor {
                slot,
                kind,
                ref resource,
                ref range,
                ..
            },
        ) => {
            next.index == prev.index + 1
                && slot == prev_slot + 1
                && kind == prev_kind
                && resource == prev_resource
                && range == prev_range
        }
        _ => false,
    }
}

/// Consecutive elements that land on consecutive copies of the same view.
fn runs(elements: &[ElementReport]) -> Vec<&[ElementReport]> {
    let mut runs = Vec::new();
    let mut start = 0;
    for i in 1..=elements.len() {
        let extends = elements
            .get(i)
            .map_or(false, |next| is_alias(&elements[i - 1], next));
        if !extends {
            runs.push(&elements[start..i]);
            start = i;
        }
    }
    runs
}

fn print_range(output: &mut impl io::Write, range: &ViewRange) -> io::Result<()> {
    match *range {
        ViewRange::Bytes { offset, size } => write!(output, "bytes {offset}..{}", offset + size),
        ViewRange::Elements {
            first_element,
            element_count,
            element_stride,
        } => write!(
            output,
            "elements {first_element}..{} x{element_stride}",
            first_element + element_count as u64
        ),
        ViewRange::Texture {
            format,
            base_mip,
            mip_count,
            first_slice,
            slice_count,
        } => write!(
            output,
            "{format:?} mips {base_mip}..{} slices {first_slice}..{}",
            base_mip + mip_count,
            first_slice + slice_count
        ),
    }
}

fn print_mapping(output: &mut impl io::Write, mapping: &Mapping) -> io::Result<()> {
    match *mapping {
        Mapping::Inline {
            root_index,
            ref resource,
            offset,
        } => write!(output, "root {root_index}, inline `{resource}` at byte {offset}"),
        Mapping::Descriptor {
            root_index,
            slot,
            kind,
            ref resource,
            ref range,
        } => {
            write!(output, "root {root_index}, slot {slot}: {kind:?} `{resource}` ")?;
            print_range(output, range)
        }
        Mapping::Empty {
            root_index,
            slot,
            reason,
        } => write!(output, "root {root_index}, slot {slot}: empty ({reason:?})"),
        Mapping::Error { kind, ref message } => write!(output, "{kind}: {message}"),
    }
}

fn print_elements(
    output: &mut impl io::Write,
    name: &str,
    array: bool,
    elements: &[ElementReport],
) -> io::Result<()> {
    for run in runs(elements) {
        let (first, last) = match (run.first(), run.last()) {
            (Some(first), Some(last)) => (first, last),
            _ => continue,
        };
        if !array {
            write!(output, "\t\t{name} -> ")?;
            print_mapping(output, &first.mapping)?;
        } else if run.len() == 1 {
            write!(output, "\t\t{name}[{}] -> ", first.index)?;
            print_mapping(output, &first.mapping)?;
        } else {
            let slots = first.mapping.slot().zip(last.mapping.slot());
            let resource = first.mapping.resource().unwrap_or_default();
            match slots {
                Some((from, to)) => write!(
                    output,
                    "\t\t{name}[{}..={}] -> slots {from}..={to}: `{resource}` ({} aliases)",
                    first.index,
                    last.index,
                    run.len()
                )?,
                None => write!(output, "\t\t{name}[{}..={}] -> `{resource}`", first.index, last.index)?,
            }
        }
        writeln!(output)?;
    }
    Ok(())
}

fn print_binding(output: &mut impl io::Write, binding: &BindingReport) -> io::Result<()> {
    writeln!(output, "\t{} : register({}) [{}]", binding.name, binding.binding, binding.count)?;
    if let Some(ref error) = binding.error {
        writeln!(output, "\t\terror: {error}")?;
    }
    if binding.count.is_unbounded() && binding.elements.is_empty() {
        writeln!(output, "\t\t<no descriptors written>")?;
    }
    let array = binding.count != DescriptorCount::Bounded(1);
    print_elements(output, &binding.name, array, &binding.elements)
}

fn print_access(output: &mut impl io::Write, access: &AccessReport) -> io::Result<()> {
    writeln!(
        output,
        "\t{}[{:?}] with indices {:?}",
        access.binding, access.source, access.indices
    )?;
    if let Some(ref error) = access.error {
        writeln!(output, "\t\terror: {error}")?;
    }
    for element in access.elements.iter() {
        write!(output, "\t\t{}[{}] -> ", access.binding, element.index)?;
        print_mapping(output, &element.mapping)?;
        writeln!(output)?;
    }
    Ok(())
}

fn print_draw(output: &mut impl io::Write, draw: &DrawReport) -> io::Result<()> {
    writeln!(
        output,
        "Draw {}:",
        draw.marker.as_deref().unwrap_or("<unmarked>")
    )?;
    writeln!(output, "\t      Pipeline: {}", draw.pipeline)?;
    writeln!(output, "\tRoot signature: {}", draw.root_signature)?;
    for target in draw.render_targets.iter() {
        writeln!(
            output,
            "\t Render target: slot {} `{}` {:?}",
            target.slot,
            target.resource.as_deref().unwrap_or("<empty>"),
            target.format
        )?;
    }

    for stage in draw.stages.iter() {
        if stage.bindings.is_empty() && stage.accesses.is_empty() {
            continue;
        }
        let name = if stage.stage == ShaderStages::PIXEL {
            "Pixel"
        } else {
            "Vertex"
        };
        writeln!(output, "    {name} bindings:")?;
        for binding in stage.bindings.iter() {
            print_binding(output, binding)?;
        }
        if !stage.accesses.is_empty() {
            writeln!(output, "    {name} accesses:")?;
        }
        for access in stage.accesses.iter() {
            print_access(output, access)?;
        }
    }
    Ok(())
}

pub fn print_report(output: &mut impl io::Write, report: &ZooReport) -> io::Result<()> {
    let views = &report.device.views;
    writeln!(
        output,
        "Shader visible heap: {} of {} slots written, populated up to {}",
        views.occupied,
        views.capacity,
        views.populated_end
    )?;
    let targets = &report.device.render_targets;
    writeln!(
        output,
        "Render target heap: {} of {} slots written",
        targets.occupied, targets.capacity
    )?;
    writeln!(output, "Resources: {}", report.device.resources.num_occupied)?;
    for draw in report.draws.iter() {
        writeln!(output)?;
        print_draw(output, draw)?;
    }
    output.flush()
}
