//! Build driver: resolve the config's source map into an object tree, run
//! every file through the content pipeline, then serialize the image.

use std::fs;
use std::path::{Path, PathBuf};

use crate::cli::Cli;
use crate::config;
use crate::error::BuildError;
use crate::fwfs::NodeId;
use crate::image::Image;
use crate::pipeline;
use crate::report::BuildLog;
use crate::rules::RuleSet;
use crate::util;

pub fn run(cli: &Cli) -> Result<(), BuildError> {
    let config_path = PathBuf::from(util::expand_env(&cli.input.to_string_lossy()));
    let cfg = config::load(&config_path)?;
    let rules = RuleSet::compile(&cfg.rules)?;

    let mut image = Image::new(&cfg.name, cfg.id.resolve()?)?;
    let root = image.root();
    rules.apply(image.tree_mut(), root);

    // Relative source paths resolve against the config file's directory.
    if let Some(dir) = config_path.parent()
        && !dir.as_os_str().is_empty()
    {
        std::env::set_current_dir(dir).map_err(|e| BuildError::Io {
            context: format!("entering config directory {}", dir.display()),
            source: e,
        })?;
    }

    let copy_dir = match &cli.files {
        Some(dir) => {
            tracing::info!(dir = %dir.display(), "writing copies of generated files");
            util::mkdir(dir)?;
            util::cleandir(dir)?;
            Some(dir.as_path())
        }
        None => None,
    };

    let mut log = BuildLog::from_arg(cli.log.as_deref())?;
    log.header();

    let mut ctx = BuildContext {
        rules: &rules,
        minify: !cli.no_minify,
        copy_dir,
        log,
    };

    for (target, source) in &cfg.source {
        let source = PathBuf::from(util::expand_env(source));
        add_entry(&mut image, &mut ctx, root, target, &source)?;
    }

    for (target, store) in &cfg.mountpoints {
        let mp = image.add_mount_point(target, *store)?;
        ctx.rules.apply(image.tree_mut(), mp);
    }

    tracing::info!(path = %cli.output.display(), "writing image");
    let object_count = image.write_to_file(&cli.output)?;

    ctx.log.totals(image.tree(), root);

    let tree = image.tree();
    let data_size = tree.total_data_size(root);
    let original_size = tree.total_original_data_size(root);
    let ratio = if original_size == 0 {
        0
    } else {
        (100.0 * data_size as f64 / original_size as f64).round() as u64
    };
    println!(
        "Image contains {} objects, {} bytes in {} files ({}% of source data size)",
        object_count,
        data_size,
        tree.file_count(root, true),
        ratio
    );
    Ok(())
}

struct BuildContext<'a> {
    rules: &'a RuleSet,
    minify: bool,
    copy_dir: Option<&'a Path>,
    log: BuildLog,
}

/// Create the image object for one source-map entry (file or directory
/// tree) and log a row for it.  Mirrors the shape of the source map: the
/// entry name is the image name, the host path supplies the content.
fn add_entry(
    image: &mut Image,
    ctx: &mut BuildContext<'_>,
    parent: NodeId,
    target: &str,
    source: &Path,
) -> Result<NodeId, BuildError> {
    let node = if source.is_dir() {
        add_directory(image, ctx, parent, target, source)?
    } else {
        add_file(image, ctx, parent, target, source)?
    };
    ctx.log.node_row(image.tree(), node);
    Ok(node)
}

fn add_directory(
    image: &mut Image,
    ctx: &mut BuildContext<'_>,
    parent: NodeId,
    target: &str,
    source: &Path,
) -> Result<NodeId, BuildError> {
    let dir = if target == "/" {
        image.root()
    } else {
        let name = target.strip_prefix('/').unwrap_or(target);
        let dir = image
            .tree_mut()
            .add_directory(parent, name, source_mtime(source)?)?;
        ctx.rules.apply(image.tree_mut(), dir);
        dir
    };

    // Directory entries are walked in name order so that two builds over
    // the same tree produce identical images.
    let mut entries: Vec<(String, PathBuf)> = Vec::new();
    let read = fs::read_dir(source).map_err(|e| BuildError::Io {
        context: format!("reading directory {}", source.display()),
        source: e,
    })?;
    for entry in read {
        let entry = entry.map_err(|e| BuildError::Io {
            context: format!("reading directory {}", source.display()),
            source: e,
        })?;
        entries.push((entry.file_name().to_string_lossy().into_owned(), entry.path()));
    }
    entries.sort();

    for (name, path) in entries {
        add_entry(image, ctx, dir, &name, &path)?;
    }
    Ok(dir)
}

fn add_file(
    image: &mut Image,
    ctx: &mut BuildContext<'_>,
    parent: NodeId,
    target: &str,
    source: &Path,
) -> Result<NodeId, BuildError> {
    let name = target.strip_prefix('/').unwrap_or(target);
    let file = image
        .tree_mut()
        .add_file(parent, name, source_mtime(source)?)?;
    ctx.rules.apply(image.tree_mut(), file);

    let stored = pipeline::process_file(image.tree_mut(), file, source, ctx.minify)?;

    if let Some(dir) = ctx.copy_dir {
        let path = image.tree().path(file);
        let dest = dir.join(path.trim_start_matches('/'));
        if let Some(parent_dir) = dest.parent() {
            util::mkdir(parent_dir)?;
        }
        tracing::debug!(path = %dest.display(), "writing file copy");
        fs::write(&dest, &stored).map_err(|e| BuildError::Io {
            context: format!("writing {}", dest.display()),
            source: e,
        })?;
    }

    Ok(file)
}

/// Host mtime in whole seconds since the epoch, as the image stores it.
fn source_mtime(source: &Path) -> Result<u32, BuildError> {
    let meta = fs::metadata(source).map_err(|e| BuildError::Io {
        context: format!("reading metadata of {}", source.display()),
        source: e,
    })?;
    let mtime = meta.modified().map_err(|e| BuildError::Io {
        context: format!("reading mtime of {}", source.display()),
        source: e,
    })?;
    Ok(mtime
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0))
}
