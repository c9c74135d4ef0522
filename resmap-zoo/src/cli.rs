use std::{io, process::exit};

use resmap_zoo::{human, Zoo, ZooConfig, ZooReport};

const HELP: &str = "\
Usage: resmap-zoo [--output <PATH>] [--json] [--marker <NAME>]

Options:
  -h, --help          Print this help
  -o, --output <PATH> Destination to write output to
  -j, --json          Output JSON information instead of text
  -m, --marker <NAME> Only report the draw with this marker

Environment:
  RESMAP_HEAP_CAPACITY  Slots of the shader visible heap (default 10000)
  RESMAP_RTV_CAPACITY   Slots of the render target heap (default 16)
";

fn usage_error(err: pico_args::Error) -> ! {
    eprintln!("{err}\n\n{HELP}");
    exit(2);
}

pub fn main() {
    let mut args = pico_args::Arguments::from_env();
    let help = args.contains(["-h", "--help"]);

    if help {
        eprintln!("{HELP}");
        exit(101);
    }

    let output_path: Option<String> = args
        .opt_value_from_str(["-o", "--output"])
        .unwrap_or_else(|err| usage_error(err));
    let marker: Option<String> = args
        .opt_value_from_str(["-m", "--marker"])
        .unwrap_or_else(|err| usage_error(err));
    let json = args.contains(["-j", "--json"]);

    env_logger::init();

    let config = ZooConfig::from_env();
    log::info!("Building the zoo with {:?}", config.limits);
    let zoo = match Zoo::build(&config) {
        Ok(zoo) => zoo,
        Err(err) => {
            eprintln!("Failed to build the zoo:\n    {err}");
            exit(1);
        }
    };
    let report = ZooReport::generate(&zoo, marker.as_deref());
    if report.draws.is_empty() {
        log::warn!("No draw matches {:?}", marker);
    }

    let mut file_handle;
    let mut std_handle;
    let mut output: &mut dyn io::Write = match output_path {
        Some(path) => match std::fs::File::create(&path) {
            Ok(file) => {
                file_handle = file;
                &mut file_handle
            }
            Err(err) => {
                eprintln!("Unable to create {path}: {err}");
                exit(1);
            }
        },
        None => {
            std_handle = io::stdout();
            &mut std_handle
        }
    };

    let result = if json {
        report.into_json(output).map_err(io::Error::from)
    } else {
        human::print_report(&mut output, &report)
    };
    if let Err(err) = result {
        eprintln!("Failed to write the report: {err}");
        exit(1);
    }
}
