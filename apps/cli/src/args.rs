//! Command-line parsing.

use std::path::PathBuf;

use anyhow::{Context, bail};

/// Options of the `upload` command. Unset values fall back to the config file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadArgs {
    pub vault: String,
    pub paths: Vec<PathBuf>,
    pub description: Option<String>,
    pub part_size_mib: Option<u64>,
    pub threads: Option<usize>,
    pub upload_id: Option<String>,
    pub region: Option<String>,
    pub no_compress: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Upload(UploadArgs),
    Abort {
        vault: String,
        upload_id: String,
        region: Option<String>,
    },
    Delete {
        vault: String,
        archive_id: String,
        region: Option<String>,
    },
    Help,
}

/// Parses the arguments after the program name.
pub fn parse(args: impl IntoIterator<Item = String>) -> anyhow::Result<Command> {
    let mut args = args.into_iter();
    let Some(command) = args.next() else {
        bail!("missing command");
    };

    let mut vault = None;
    let mut upload = UploadArgs::default();
    let mut archive_id = None;

    while let Some(arg) = args.next() {
        let mut value = || {
            args.next()
                .with_context(|| format!("{arg} needs a value"))
        };
        match arg.as_str() {
            "--vault-name" | "-v" => vault = Some(value()?),
            "--file-name" | "-f" => upload.paths.push(PathBuf::from(value()?)),
            "--arc-desc" | "-d" => upload.description = Some(value()?),
            "--part-size" | "-p" => {
                let raw = value()?;
                upload.part_size_mib = Some(
                    raw.parse()
                        .with_context(|| format!("part size {raw:?} is not a number"))?,
                );
            }
            "--num-threads" | "-t" => {
                let raw = value()?;
                upload.threads = Some(
                    raw.parse()
                        .with_context(|| format!("thread count {raw:?} is not a number"))?,
                );
            }
            "--upload-id" | "-u" => upload.upload_id = Some(value()?),
            "--archive-id" | "-a" => archive_id = Some(value()?),
            "--region" | "-r" => upload.region = Some(value()?),
            "--no-compress" => upload.no_compress = true,
            "--help" | "-h" => return Ok(Command::Help),
            other => bail!("unknown argument: {other}"),
        }
    }

    match command.as_str() {
        "upload" => {
            upload.vault = vault.context("--vault-name is required")?;
            if upload.paths.is_empty() {
                bail!("at least one --file-name is required");
            }
            if archive_id.is_some() {
                bail!("--archive-id is only valid for delete");
            }
            Ok(Command::Upload(upload))
        }
        "abort" => Ok(Command::Abort {
            vault: vault.context("--vault-name is required")?,
            upload_id: upload.upload_id.context("--upload-id is required")?,
            region: upload.region,
        }),
        "delete" => Ok(Command::Delete {
            vault: vault.context("--vault-name is required")?,
            archive_id: archive_id.context("--archive-id is required")?,
            region: upload.region,
        }),
        "help" | "--help" | "-h" => Ok(Command::Help),
        other => bail!("unknown command: {other}"),
    }
}

pub fn print_usage() {
    eprintln!(
        r#"
Usage:
    glacier-upload upload -v <VAULT> -f <PATH>... [OPTIONS]
    glacier-upload abort  -v <VAULT> -u <UPLOAD_ID> [-r <REGION>]
    glacier-upload delete -v <VAULT> -a <ARCHIVE_ID> [-r <REGION>]

Upload options:
    -v, --vault-name <NAME>     Vault to upload to (required)
    -f, --file-name <PATH>      File or directory to archive; repeatable (required)
    -d, --arc-desc <TEXT>       Archive description [default: ""]
    -p, --part-size <MiB>       Part size, power of two 1..4096 [default: 8]
    -t, --num-threads <N>       Concurrent part uploads [default: 5]
    -u, --upload-id <ID>        Resume an existing multipart upload
    -r, --region <REGION>       AWS region [default: from environment]
        --no-compress           Upload a single regular file as-is
    -h, --help                  Print this help

Settings not given on the command line are read from
~/.config/glacier-upload/config.toml when it exists.
Set RUST_LOG=debug for per-part logging.
"#
    );
}
