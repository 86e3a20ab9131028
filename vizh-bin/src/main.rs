// SPDX-License-Identifier: MPL-2.0

use anyhow::Context;
use glob::glob;
use nalgebra::DMatrix;
use std::path::{Path, PathBuf};

use vizh::compiler::Compiler;
use vizh::img::annotate;
use vizh::img::preprocess;
use vizh::ir::Function;
use vizh::linker::{self, Linker};
use vizh::parser::{ParseError, Parser};
use vizh::toolchain::OBJECT_EXT;

/// Entry point of the program.
fn main() -> anyhow::Result<()> {
    // CLI arguments controlling what gets produced.
    let output_args = vec![
        clap::Arg::with_name("compile-only")
            .short("c")
            .long("compile-only")
            .help("Only compile, don't link"),
        clap::Arg::with_name("output-file")
            .short("o")
            .long("output-file")
            .value_name("path")
            .help("Output file"),
        clap::Arg::with_name("build-runtime")
            .long("build-runtime")
            .value_name("dir")
            .help("Compile the runtime sources in <dir> into the runtime directory and exit"),
    ];
    // CLI arguments related to diagnostics and the rest.
    let input_output_args = vec![
        clap::Arg::with_name("quiet")
            .short("q")
            .long("quiet")
            .help("Suppress informational output"),
        clap::Arg::with_name("debug-parser")
            .long("debug-parser")
            .help("Save an annotated render of the classification decisions next to each image input"),
        clap::Arg::with_name("verbose")
            .short("v")
            .multiple(true)
            .help("Multiple levels of verbosity (up to -vvv)"),
        clap::Arg::with_name("INPUT or GLOB")
            .multiple(true)
            .help("Image sources, C sources and object files, classified by extension"),
    ];
    // Read all CLI arguments.
    let matches = clap::App::new("vizh")
        .version(std::env!("CARGO_PKG_VERSION"))
        .about("Compiler for the vizh visual programming language")
        .args(&output_args)
        .args(&input_output_args)
        .get_matches();
    // Set log verbosity.
    let verbosity = 1 + matches.occurrences_of("verbose");
    stderrlog::new()
        .quiet(matches.is_present("quiet"))
        .verbosity(verbosity as usize)
        .show_level(false)
        .color(stderrlog::ColorChoice::Never)
        .init()
        .context("Failed to initialize log verbosity")?;
    // Start program.
    run(get_args(&matches)?)
}

#[derive(Debug)]
/// Type holding command line arguments.
struct Args {
    compile_only: bool,
    output_file: Option<PathBuf>,
    quiet: bool,
    debug_parser: bool,
    build_runtime: Option<PathBuf>,
    inputs: Vec<PathBuf>,
}

/// Retrieve the program arguments from clap matches.
fn get_args(matches: &clap::ArgMatches) -> anyhow::Result<Args> {
    let inputs = match matches.values_of("INPUT or GLOB") {
        None => Vec::new(),
        Some(values) => absolute_file_paths(values)?,
    };
    Ok(Args {
        compile_only: matches.is_present("compile-only"),
        output_file: matches.value_of("output-file").map(PathBuf::from),
        quiet: matches.is_present("quiet"),
        debug_parser: matches.is_present("debug-parser"),
        build_runtime: matches.value_of("build-runtime").map(PathBuf::from),
        inputs,
    })
}

/// Retrieve the absolute paths of all files matching the arguments.
fn absolute_file_paths<'a, Paths: Iterator<Item = &'a str>>(
    args: Paths,
) -> anyhow::Result<Vec<PathBuf>> {
    let mut abs_paths = Vec::new();
    for path_glob in args {
        let mut paths = paths_from_glob(path_glob)?;
        abs_paths.append(&mut paths);
    }
    abs_paths
        .iter()
        .map(|p| p.canonicalize().map_err(|e| e.into()))
        .collect()
}

/// Retrieve the paths of files matchin the glob pattern.
fn paths_from_glob(p: &str) -> anyhow::Result<Vec<PathBuf>> {
    let paths = glob(p)?;
    Ok(paths.into_iter().filter_map(|x| x.ok()).collect())
}

/// Inputs sorted into object files, C sources and image sources.
fn split_file_types(files: &[PathBuf]) -> (Vec<PathBuf>, Vec<PathBuf>, Vec<PathBuf>) {
    let mut object_files = Vec::new();
    let mut c_files = Vec::new();
    let mut image_files = Vec::new();
    for file in files {
        match file.extension().and_then(|e| e.to_str()) {
            Some("c") => c_files.push(file.clone()),
            Some("o") | Some("obj") => object_files.push(file.clone()),
            _ => image_files.push(file.clone()),
        }
    }
    (object_files, c_files, image_files)
}

/// Start actual program with command line arguments successfully parsed.
fn run(args: Args) -> anyhow::Result<()> {
    if let Some(source_dir) = &args.build_runtime {
        vizh::libv::compile_libv(source_dir, &linker::runtime_dir())
            .context("Failed to build the runtime")?;
        return Ok(());
    }
    if args.inputs.is_empty() {
        anyhow::bail!("There are no input files. Use --help to know how to use this program.");
    }

    let (supplied_objects, c_files, image_files) = split_file_types(&args.inputs);
    let scratch = tempfile::Builder::new()
        .prefix("vizh")
        .tempdir()
        .context("Failed to create the scratch directory")?;
    let compiler = Compiler::new();

    // Parse every image source, reporting all failures in one pass.
    let mut functions = Vec::new();
    let mut parse_failed = false;
    if !image_files.is_empty() {
        let mut parser = Parser::new().context("Failed to initialise the OCR adapter")?;
        for file in &image_files {
            match parser.parse_file(file) {
                Ok(parsed) => {
                    if args.debug_parser {
                        save_debug_render(file, &parsed);
                    }
                    functions.push(parsed.function);
                }
                Err(err) => {
                    parse_failed = true;
                    report_parse_error(file, &err);
                }
            }
        }
    }

    // Lower everything that parsed into one object file.
    let mut compile_failed = parse_failed;
    let vizh_object = if parse_failed || functions.is_empty() {
        None
    } else {
        match compiler.compile_functions(&mut functions, &[], scratch.path()) {
            Ok(object) => Some(object),
            Err(err) => {
                compile_failed = true;
                eprintln!("Error while compiling vizh sources:\n{}", err);
                None
            }
        }
    };

    // Compile the hand-written C sources, again attempting every file.
    let mut c_objects = Vec::new();
    for file in &c_files {
        match compiler.compile_c_program(file, scratch.path()) {
            Ok(object) => c_objects.push(object),
            Err(err) => {
                compile_failed = true;
                eprintln!(
                    "C compiler reported an error in compiling {}:\n{}",
                    file.display(),
                    err
                );
            }
        }
    }

    let output_file = args
        .output_file
        .clone()
        .unwrap_or_else(|| default_output_file(args.compile_only, &functions));

    // If we're only compiling, move the object files into place and exit.
    if args.compile_only {
        if let Some(object) = &vizh_object {
            std::fs::copy(object, &output_file)
                .with_context(|| format!("Failed to write {}", output_file.display()))?;
            if !args.quiet {
                println!("{:?} -> {}", image_files, output_file.display());
            }
        }
        for (source, object) in c_files.iter().zip(c_objects.iter()) {
            let target = object
                .file_name()
                .map(PathBuf::from)
                .unwrap_or_else(|| output_file.clone());
            std::fs::copy(object, &target)
                .with_context(|| format!("Failed to write {}", target.display()))?;
            if !args.quiet {
                println!("{} -> {}", source.display(), target.display());
            }
        }
        return finish(compile_failed, scratch);
    }

    if compile_failed {
        return finish(true, scratch);
    }

    let mut objects = supplied_objects;
    objects.extend(c_objects);
    objects.extend(vizh_object);

    // The runtime's entry shim supplies the real main whenever the unit
    // defines the (already mangled) user entry point.
    let link_crtv = functions
        .iter()
        .any(|f| f.signature.name == "main" || f.signature.name == "vizh_main");
    Linker::new()
        .link(&objects, &output_file, link_crtv)
        .context("Failed to link")?;
    if !args.quiet {
        println!("{:?} -> {}", args.inputs, output_file.display());
    }
    Ok(())
}

/// Default output name: an executable when linking; for compile-only, the
/// function name when there is exactly one, else a fixed object name.
fn default_output_file(compile_only: bool, functions: &[Function]) -> PathBuf {
    if compile_only {
        if functions.len() == 1 {
            PathBuf::from(format!("{}.{}", functions[0].signature.name, OBJECT_EXT))
        } else {
            PathBuf::from(format!("vizh.{}", OBJECT_EXT))
        }
    } else if cfg!(windows) {
        PathBuf::from("a.exe")
    } else {
        PathBuf::from("a.out")
    }
}

/// On failure keep the scratch directory around for diagnostics.
fn finish(failed: bool, scratch: tempfile::TempDir) -> anyhow::Result<()> {
    if failed {
        let kept = scratch.into_path();
        log::warn!("intermediate files kept in {}", kept.display());
        anyhow::bail!("Compilation failed :(");
    }
    Ok(())
}

/// Print a parse failure; shape errors also get a rendered image with a
/// red box around every offending contour.
fn report_parse_error(file: &Path, err: &ParseError) {
    match err {
        ParseError::Shapes(shape_errors) => {
            let render = file.with_extension("errors.png");
            eprintln!(
                "Error parsing {} (see {} for details)",
                file.display(),
                render.display()
            );
            for shape_error in shape_errors {
                eprintln!("  {}", shape_error);
            }
            match preprocess::load_grayscale(file) {
                Ok(gray) => {
                    let boxes: Vec<_> = shape_errors.iter().map(|e| e.bounding_box).collect();
                    let annotated = annotate::render_boxes(&gray, &boxes, annotate::ERROR_COLOR);
                    if let Err(save_err) = annotated.save(&render) {
                        log::warn!("could not save {}: {}", render.display(), save_err);
                    }
                }
                Err(read_err) => {
                    log::warn!("could not re-read {}: {}", file.display(), read_err)
                }
            }
        }
        other => eprintln!("Error parsing {}: {}", file.display(), other),
    }
}

/// Save the recognised lines as boxes drawn over the source image.
fn save_debug_render(file: &Path, parsed: &vizh::parser::Parsed) {
    let gray: DMatrix<u8> = match preprocess::load_grayscale(file) {
        Ok(gray) => gray,
        Err(err) => {
            log::warn!("could not re-read {}: {}", file.display(), err);
            return;
        }
    };
    let boxes = parsed.line_boxes(gray.shape());
    let render = file.with_extension("debug.png");
    let annotated = annotate::render_boxes(&gray, &boxes, annotate::LINE_COLOR);
    match annotated.save(&render) {
        Ok(()) => log::info!("classification render saved to {}", render.display()),
        Err(err) => log::warn!("could not save {}: {}", render.display(), err),
    }
}
