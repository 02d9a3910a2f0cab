//! splatkit - convert, merge, and edit Gaussian splat files.
//!
//! Usage: `splatkit [GLOBAL] <input> [ACTIONS]... <output> [ACTIONS]`.
//! At least two paths are required; the last one is the output. Actions
//! bind to the path on their left and run in command order, inputs before
//! the merge and the output's actions after it.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{ArgAction, Parser};
use nalgebra::Vector3;
use rayon::prelude::*;

use splatkit::core::transform::{self, Action, Compare};
use splatkit::core::combine;
use splatkit::io::{self, Document, IoError, WriteOptions};

#[derive(Parser, Debug)]
#[command(
    name = "splatkit",
    version,
    about = "Convert, merge, and edit 3D Gaussian splat files",
    disable_version_flag = true
)]
struct Cli {
    /// Print version
    #[arg(short = 'v', long = "version", action = ArgAction::Version)]
    version: Option<bool>,

    /// Overwrite the output file when it already exists
    #[arg(short = 'w', long)]
    overwrite: bool,

    /// Disable the GPU clustering backend
    #[arg(short = 'g', long = "no-gpu")]
    no_gpu: bool,

    /// k-means iterations for compressed output
    #[arg(short = 'i', long, default_value_t = 10, value_name = "N")]
    iterations: usize,

    /// Camera position baked into HTML output
    #[arg(short = 'p', long = "cameraPos", default_value = "2,2,-2", value_name = "x,y,z")]
    camera_pos: String,

    /// Camera target baked into HTML output
    #[arg(short = 'e', long = "cameraTarget", default_value = "0,0,0", value_name = "x,y,z")]
    camera_target: String,

    /// Input files, the output file, and their per-file actions:
    /// -t x,y,z  -r x,y,z  -s x  -n  -c name,cmp,value  -b 0|1|2|3
    /// -P name=value[,name=value...]
    #[arg(
        trailing_var_arg = true,
        allow_hyphen_values = true,
        required = true,
        value_name = "FILE|ACTION"
    )]
    pipeline: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("{0}")]
    Usage(String),
    #[error("{0}")]
    Io(#[from] IoError),
    #[error("{0}")]
    Core(#[from] splatkit::core::Error),
}

type Result<T> = std::result::Result<T, CliError>;

struct FileSpec {
    path: PathBuf,
    actions: Vec<Action>,
}

fn parse_vector(text: &str) -> Result<Vector3<f64>> {
    let parts: Vec<&str> = text.split(',').collect();
    if parts.len() != 3 {
        return Err(CliError::Usage(format!(
            "expected three comma-separated numbers, got '{text}'"
        )));
    }
    let mut values = [0.0f64; 3];
    for (slot, part) in parts.iter().enumerate() {
        values[slot] = part
            .trim()
            .parse()
            .map_err(|_| CliError::Usage(format!("malformed vector component '{part}'")))?;
    }
    Ok(Vector3::new(values[0], values[1], values[2]))
}

fn parse_number(text: &str) -> Result<f64> {
    text.trim()
        .parse()
        .map_err(|_| CliError::Usage(format!("malformed number '{text}'")))
}

fn next_value(flag: &str, iter: &mut std::slice::Iter<'_, String>) -> Result<String> {
    iter.next()
        .cloned()
        .ok_or_else(|| CliError::Usage(format!("{flag} requires a value")))
}

fn parse_pipeline(tokens: &[String]) -> Result<Vec<FileSpec>> {
    let mut specs: Vec<FileSpec> = Vec::new();
    let mut iter = tokens.iter();

    while let Some(token) = iter.next() {
        let action = match token.as_str() {
            "-t" | "--translate" => Some(Action::Translate(parse_vector(&next_value(token, &mut iter)?)?)),
            "-r" | "--rotate" => Some(Action::Rotate(parse_vector(&next_value(token, &mut iter)?)?)),
            "-s" | "--scale" => Some(Action::Scale(parse_number(&next_value(token, &mut iter)?)?)),
            "-n" | "--filterNaN" => Some(Action::FilterNan),
            "-c" | "--filterByValue" => {
                let spec = next_value(token, &mut iter)?;
                let parts: Vec<&str> = spec.split(',').collect();
                if parts.len() != 3 {
                    return Err(CliError::Usage(format!(
                        "expected name,cmp,value after {token}, got '{spec}'"
                    )));
                }
                Some(Action::FilterByValue {
                    column: parts[0].to_string(),
                    compare: Compare::parse(parts[1])?,
                    value: parse_number(parts[2])?,
                })
            }
            "-b" | "--filterBands" => {
                let bands: usize = next_value(token, &mut iter)?
                    .parse()
                    .ok()
                    .filter(|b| *b <= 3)
                    .ok_or_else(|| CliError::Usage("band count must be 0, 1, 2, or 3".into()))?;
                Some(Action::FilterBands(bands))
            }
            "-P" | "--params" => {
                let spec = next_value(token, &mut iter)?;
                let target = specs
                    .last_mut()
                    .ok_or_else(|| CliError::Usage(format!("{token} before any file")))?;
                for pair in spec.split(',') {
                    let (name, value) = pair.split_once('=').ok_or_else(|| {
                        CliError::Usage(format!("expected name=value in '{spec}'"))
                    })?;
                    target.actions.push(Action::Param {
                        name: name.to_string(),
                        value: value.to_string(),
                    });
                }
                None
            }
            flag if flag.starts_with('-') && flag.len() > 1 => {
                return Err(CliError::Usage(format!("unknown action '{flag}'")));
            }
            _ => {
                specs.push(FileSpec {
                    path: PathBuf::from(token),
                    actions: Vec::new(),
                });
                None
            }
        };
        if let Some(action) = action {
            specs
                .last_mut()
                .ok_or_else(|| CliError::Usage(format!("{token} before any file")))?
                .actions
                .push(action);
        }
    }

    if specs.len() < 2 {
        return Err(CliError::Usage(
            "at least one input and one output file are required".into(),
        ));
    }
    Ok(specs)
}

fn run(cli: Cli) -> Result<()> {
    let mut specs = parse_pipeline(&cli.pipeline)?;
    let output = specs.pop().expect("parse_pipeline guarantees two specs");

    if output.path.exists() && !cli.overwrite {
        return Err(CliError::Usage(format!(
            "output '{}' exists (pass -w to overwrite)",
            output.path.display()
        )));
    }

    // Inputs load concurrently; each file's own actions run sequentially
    // against its table.
    let documents: Vec<Document> = specs
        .par_iter()
        .map(|spec| -> Result<Document> {
            log::info!("reading {}", spec.path.display());
            let doc = io::read_document(&spec.path)?;
            let table = transform::apply(doc.table, &spec.actions)?;
            Ok(Document {
                table,
                comments: doc.comments,
            })
        })
        .collect::<Result<_>>()?;

    let tables: Vec<_> = documents.iter().map(|d| d.table.clone()).collect();
    let merged = combine(&tables)?;
    let comments: Vec<String> = documents.into_iter().flat_map(|d| d.comments).collect();

    let table = transform::apply(merged, &output.actions)?;
    log::info!(
        "writing {} splats to {}",
        table.num_rows(),
        output.path.display()
    );

    let options = WriteOptions {
        iterations: cli.iterations,
        use_gpu: !cli.no_gpu,
        camera_pos: parse_vector(&cli.camera_pos)?.into(),
        camera_target: parse_vector(&cli.camera_target)?.into(),
    };
    io::write_document(&output.path, Document { table, comments }, &options)?;
    Ok(())
}

fn main() -> ExitCode {
    env_logger::init();
    if let Err(e) = splatkit::init_thread_pool(None) {
        eprintln!("error: {e}");
        return ExitCode::FAILURE;
    }
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e)
            if matches!(
                e.kind(),
                clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion
            ) =>
        {
            print!("{e}");
            return ExitCode::SUCCESS;
        }
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn actions_bind_to_the_preceding_file() {
        let specs = parse_pipeline(&tokens(&[
            "a.ply", "-t", "1,2,3", "-s", "2", "b.ply", "-n", "out.sog", "-b", "1",
        ]))
        .unwrap();
        assert_eq!(specs.len(), 3);
        assert_eq!(specs[0].actions.len(), 2);
        assert_eq!(specs[1].actions.len(), 1);
        assert_eq!(specs[2].actions.len(), 1);
        assert!(matches!(specs[2].actions[0], Action::FilterBands(1)));
    }

    #[test]
    fn rejects_action_before_any_file() {
        assert!(parse_pipeline(&tokens(&["-n", "a.ply", "out.ply"])).is_err());
    }

    #[test]
    fn rejects_single_path() {
        assert!(parse_pipeline(&tokens(&["only.ply"])).is_err());
    }

    #[test]
    fn rejects_malformed_vectors() {
        assert!(parse_pipeline(&tokens(&["a.ply", "-t", "1,2", "out.ply"])).is_err());
        assert!(parse_pipeline(&tokens(&["a.ply", "-t", "1,x,3", "out.ply"])).is_err());
    }

    #[test]
    fn rejects_unknown_comparator_and_band() {
        assert!(parse_pipeline(&tokens(&["a.ply", "-c", "opacity,within,1", "out.ply"])).is_err());
        assert!(parse_pipeline(&tokens(&["a.ply", "-b", "4", "out.ply"])).is_err());
    }

    #[test]
    fn params_expand_to_individual_actions() {
        let specs =
            parse_pipeline(&tokens(&["gen.mjs", "-P", "count=100,radius=2.5", "out.ply"])).unwrap();
        assert_eq!(specs[0].actions.len(), 2);
        assert!(
            matches!(&specs[0].actions[1], Action::Param { name, value } if name == "radius" && value == "2.5")
        );
    }

    #[test]
    fn negative_vector_components_parse() {
        let specs = parse_pipeline(&tokens(&["a.ply", "-t", "-1,-2,-3", "out.ply"])).unwrap();
        assert!(
            matches!(&specs[0].actions[0], Action::Translate(v) if v.x == -1.0 && v.y == -2.0)
        );
    }

    mod end_to_end {
        use super::*;
        use splatkit::core::column::{Column, DataTable};
        use splatkit::core::gaussian::REQUIRED_COLUMNS;

        fn single_splat() -> DataTable {
            DataTable::new(
                REQUIRED_COLUMNS
                    .iter()
                    .map(|name| {
                        let v = match *name {
                            "x" => 1.0,
                            "rot_0" => 1.0,
                            _ => 0.0,
                        };
                        Column::f32(*name, vec![v])
                    })
                    .collect(),
            )
            .unwrap()
        }

        fn cli_for(pipeline: Vec<String>, overwrite: bool) -> Cli {
            Cli {
                version: None,
                overwrite,
                no_gpu: true,
                iterations: 4,
                camera_pos: "2,2,-2".into(),
                camera_target: "0,0,0".into(),
                pipeline,
            }
        }

        #[test]
        fn transform_pipeline_matches_trs_semantics() {
            let dir = tempfile::tempdir().unwrap();
            let input = dir.path().join("in.ply");
            let output = dir.path().join("out.ply");
            splatkit::io::write_document(
                &input,
                Document::new(single_splat()),
                &WriteOptions::default(),
            )
            .unwrap();

            let pipeline = tokens(&[
                input.to_str().unwrap(),
                "-r",
                "0,90,0",
                "-t",
                "0,0,1",
                "-s",
                "2",
                output.to_str().unwrap(),
            ]);
            run(cli_for(pipeline, false)).unwrap();

            let doc = splatkit::io::read_document(&output).unwrap();
            assert!((doc.table.column("x").unwrap().get(0)).abs() < 1e-5);
            assert!((doc.table.column("y").unwrap().get(0)).abs() < 1e-5);
            assert!((doc.table.column("z").unwrap().get(0) + 1.0).abs() < 1e-5);
            let half = std::f64::consts::FRAC_1_SQRT_2;
            assert!((doc.table.column("rot_0").unwrap().get(0) - half).abs() < 1e-5);
            assert!((doc.table.column("rot_2").unwrap().get(0) - half).abs() < 1e-5);
            let ln2 = 2.0f64.ln();
            assert!((doc.table.column("scale_0").unwrap().get(0) - ln2).abs() < 1e-5);
        }

        #[test]
        fn merge_two_inputs_preserves_order() {
            let dir = tempfile::tempdir().unwrap();
            let a = dir.path().join("a.ply");
            let b = dir.path().join("b.ply");
            let out = dir.path().join("merged.ply");

            let mut table = single_splat();
            table.column_mut("x").unwrap().set(0, -5.0);
            splatkit::io::write_document(&a, Document::new(table), &WriteOptions::default())
                .unwrap();
            let mut table = single_splat();
            table.column_mut("x").unwrap().set(0, 7.0);
            splatkit::io::write_document(&b, Document::new(table), &WriteOptions::default())
                .unwrap();

            run(cli_for(
                tokens(&[a.to_str().unwrap(), b.to_str().unwrap(), out.to_str().unwrap()]),
                false,
            ))
            .unwrap();

            let doc = splatkit::io::read_document(&out).unwrap();
            assert_eq!(doc.table.num_rows(), 2);
            assert_eq!(doc.table.column("x").unwrap().get(0), -5.0);
            assert_eq!(doc.table.column("x").unwrap().get(1), 7.0);
        }

        #[test]
        fn existing_output_requires_overwrite() {
            let dir = tempfile::tempdir().unwrap();
            let input = dir.path().join("in.ply");
            let output = dir.path().join("out.ply");
            splatkit::io::write_document(
                &input,
                Document::new(single_splat()),
                &WriteOptions::default(),
            )
            .unwrap();
            std::fs::write(&output, b"occupied").unwrap();

            let pipeline = tokens(&[input.to_str().unwrap(), output.to_str().unwrap()]);
            let err = run(cli_for(pipeline.clone(), false)).unwrap_err();
            assert!(matches!(err, CliError::Usage(_)));

            run(cli_for(pipeline, true)).unwrap();
            let doc = splatkit::io::read_document(&output).unwrap();
            assert_eq!(doc.table.num_rows(), 1);
        }
    }
}
