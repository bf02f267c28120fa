#![warn(clippy::unwrap_used)]

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use portfolio_pdf::{
    configuration::PortfolioConfiguration,
    error::ContextError,
    json_save, portfolio,
    reader::{self, LopdfImageSource},
    report::Notice,
    workspace::{Segment, Workspace},
};

/// Pack labeled image segments into a PDF, and recover them from it later on.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct CliArguments {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Render the images of every segment into a PDF save file.
    Pack {
        #[arg(short = 's', long = "student", value_name = "name", default_value = "")]
        student_name: String,
        /// The images of a segment, as `N=image[,image...]`. Repeat it for every segment.
        #[arg(long = "segment", value_name = "segment_images", value_parser = parse_segment_images)]
        segments: Vec<SegmentImages>,
        #[arg(short = 'o', long = "output", value_name = "pdf_file")]
        output_pdf_path: PathBuf,
        #[arg(short = 'c', long = "configuration", value_name = "json_file")]
        configuration_path: Option<PathBuf>,
    },
    /// Recover the segments of a PDF save file into a directory.
    Unpack {
        #[arg(short = 'i', long = "input", value_name = "pdf_file")]
        input_pdf_path: PathBuf,
        #[arg(short = 'o', long = "output-directory", value_name = "directory")]
        output_directory: PathBuf,
        /// Also write the recovered workspace in the JSON save format.
        #[arg(long = "json", value_name = "json_file")]
        json_save_path: Option<PathBuf>,
        #[arg(short = 'c', long = "configuration", value_name = "json_file")]
        configuration_path: Option<PathBuf>,
    },
    /// Print the manifest embedded in a PDF save file.
    Inspect {
        #[arg(short = 'i', long = "input", value_name = "pdf_file")]
        input_pdf_path: PathBuf,
    },
}

#[derive(Debug, Clone)]
struct SegmentImages {
    segment: Segment,
    image_paths: Vec<PathBuf>,
}

fn parse_segment_images(argument: &str) -> Result<SegmentImages, String> {
    let (segment, image_paths) = argument
        .split_once('=')
        .ok_or_else(|| format!("expected `N=image[,image...]`, found {argument:?}"))?;
    let segment = Segment::from_key(segment)
        .ok_or_else(|| format!("{segment:?} is not a valid segment number"))?;
    let image_paths = image_paths
        .split(',')
        .map(str::trim)
        .filter(|image_path| !image_path.is_empty())
        .map(PathBuf::from)
        .collect();

    Ok(SegmentImages {
        segment,
        image_paths,
    })
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(error) = fallible_main().await {
        log::error!("{}", error);
        std::process::exit(1);
    }
}

async fn fallible_main() -> Result<(), ContextError> {
    let arguments = CliArguments::parse();
    log::debug!("{:?}", arguments);

    match arguments.command {
        Command::Pack {
            student_name,
            segments,
            output_pdf_path,
            configuration_path,
        } => {
            let configuration = read_configuration(configuration_path.as_deref())?;
            pack(student_name, segments, &output_pdf_path, &configuration)
        }
        Command::Unpack {
            input_pdf_path,
            output_directory,
            json_save_path,
            configuration_path,
        } => {
            let configuration = read_configuration(configuration_path.as_deref())?;
            unpack(
                &input_pdf_path,
                &output_directory,
                json_save_path.as_deref(),
                &configuration,
            )
            .await
        }
        Command::Inspect { input_pdf_path } => inspect(&input_pdf_path),
    }
}

fn read_configuration(
    configuration_path: Option<&Path>,
) -> Result<PortfolioConfiguration, ContextError> {
    match configuration_path {
        Some(configuration_path) => PortfolioConfiguration::from_path(configuration_path),
        None => Ok(PortfolioConfiguration::default()),
    }
}

fn read_file(path: &Path) -> Result<Vec<u8>, ContextError> {
    std::fs::read(path)
        .map_err(|error| ContextError::with_error(format!("Failed to read the file {:?}", path), &error))
}

fn write_file(path: &Path, contents: &[u8]) -> Result<(), ContextError> {
    std::fs::write(path, contents).map_err(|error| {
        ContextError::with_error(format!("Failed to write the file {:?}", path), &error)
    })
}

fn pack(
    student_name: String,
    segments: Vec<SegmentImages>,
    output_pdf_path: &Path,
    configuration: &PortfolioConfiguration,
) -> Result<(), ContextError> {
    let mut workspace = Workspace::new();
    workspace.set_student_name(student_name);
    for SegmentImages {
        segment,
        image_paths,
    } in segments
    {
        for image_path in image_paths {
            if workspace.is_full(segment) {
                log::warn!("Segment {segment} is full, leaving out the image {image_path:?}");
                continue;
            }
            workspace.add_image(segment, read_file(&image_path)?);
        }
    }

    let save_outcome = portfolio::save_to_pdf(&mut workspace, configuration)?;
    for skipped in &save_outcome.skipped {
        println!(
            "Left out image {} of segment {} ({})",
            skipped.index + 1,
            skipped.segment,
            skipped.reason
        );
    }
    write_file(output_pdf_path, &save_outcome.pdf_bytes)?;
    log::info!(
        "Saved the portfolio of {} images to the path: {:?}",
        save_outcome.manifest.image_placements.len(),
        output_pdf_path
    );

    Ok(())
}

async fn unpack(
    input_pdf_path: &Path,
    output_directory: &Path,
    json_save_path: Option<&Path>,
    configuration: &PortfolioConfiguration,
) -> Result<(), ContextError> {
    let pdf_bytes = read_file(input_pdf_path)?;
    let mut workspace = Workspace::new();
    let load_outcome = portfolio::load_from_pdf(&pdf_bytes, &mut workspace, configuration)
        .await
        .map_err(|error| {
            ContextError::with_error(format!("Failed to load the file {:?}", input_pdf_path), &error)
        })?;

    for (segment, images) in workspace.iter() {
        if images.is_empty() {
            continue;
        }
        let segment_directory = output_directory.join(format!("segment-{segment}"));
        std::fs::create_dir_all(&segment_directory).map_err(|error| {
            ContextError::with_error(
                format!("Failed to create the directory {:?}", segment_directory),
                &error,
            )
        })?;
        for (index, image) in images.iter().enumerate() {
            let image_path = segment_directory.join(format!("image-{}.jpg", index + 1));
            write_file(&image_path, &image.data)?;
        }
    }

    if let Some(json_save_path) = json_save_path {
        let json_save = json_save::to_json(&workspace).map_err(|error| {
            ContextError::with_error("Failed to serialize the JSON save", &error)
        })?;
        write_file(json_save_path, json_save.as_bytes())?;
    }

    let prefix = match load_outcome.report.severity() {
        Notice::Error => "Warning",
        Notice::Info => "Done",
    };
    for message in &load_outcome.report.messages {
        println!("{prefix}: {message}");
    }

    Ok(())
}

fn inspect(input_pdf_path: &Path) -> Result<(), ContextError> {
    let pdf_bytes = read_file(input_pdf_path)?;
    let manifest = LopdfImageSource::from_bytes(&pdf_bytes)
        .and_then(|source| reader::read_save_manifest(&source))
        .map_err(|error| {
            ContextError::with_error(format!("Failed to inspect the file {:?}", input_pdf_path), &error)
        })?;
    let manifest_json = serde_json::to_string_pretty(&manifest)
        .map_err(|error| ContextError::with_error("Failed to format the manifest", &error))?;
    println!("{manifest_json}");

    Ok(())
}
