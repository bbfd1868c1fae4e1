use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use kdcode::dataset::ImageSource;
use kdcode::{
    train_from_images, EncodedDataset, EncoderConfig, ErrorPolicy, KdTree, MetadataTable,
    NodePath, NpzImageSource, TreeConfig,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "kdcode", about = "KD-tree log-ratio encoding of image pixel clouds")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Train a tree on the pixels of a directory of `.npz` images.
    Train {
        /// Directory of `.npz` images (array key `x`, channels first).
        #[arg(long)]
        images: PathBuf,
        /// Output tree file (JSON).
        #[arg(long)]
        out: PathBuf,
        /// Maximum number of images sampled for training.
        #[arg(long, default_value_t = 200)]
        max_images: usize,
        /// Nodes with fewer training points become leaves.
        #[arg(long, default_value_t = 100)]
        limit: usize,
        /// Nodes deeper than this become leaves.
        #[arg(long, default_value_t = 8)]
        depth: usize,
        /// Seed for image sampling and split selection.
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Print the log-ratio code of one image.
    Encode {
        /// Trained tree file.
        #[arg(long)]
        tree: PathBuf,
        /// Image file (`.npz`).
        image: PathBuf,
    },
    /// Print the first levels of a trained tree.
    Dump {
        /// Trained tree file.
        #[arg(long)]
        tree: PathBuf,
        /// Number of levels to print.
        #[arg(long, default_value_t = 2)]
        levels: usize,
        /// Start at the node with this path (e.g. `01`) instead of the root.
        #[arg(long)]
        from: Option<NodePath>,
    },
    /// Encode every image listed in a metadata table into a feature CSV.
    Dataset {
        /// Trained tree file.
        #[arg(long)]
        tree: PathBuf,
        /// Directory of `.npz` images.
        #[arg(long)]
        images: PathBuf,
        /// Metadata CSV (first column = image file name).
        #[arg(long)]
        metadata: PathBuf,
        /// Output feature CSV.
        #[arg(long)]
        out: PathBuf,
        /// Metadata column holding the label.
        #[arg(long, default_value = "rich")]
        label_column: String,
        /// Tree levels used as features.
        #[arg(long, default_value_t = 8)]
        depth: usize,
        /// Skip images that fail to load instead of aborting.
        #[arg(long)]
        skip_errors: bool,
        /// Worker threads (0 = all cores).
        #[arg(long, default_value_t = 0)]
        threads: usize,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Train {
            images,
            out,
            max_images,
            limit,
            depth,
            seed,
        } => {
            let config = TreeConfig {
                seed,
                ..TreeConfig::new(limit, depth)
            };
            run_train(images, out, max_images, config)?
        }
        Commands::Encode { tree, image } => run_encode(tree, image)?,
        Commands::Dump { tree, levels, from } => run_dump(tree, levels, from)?,
        Commands::Dataset {
            tree,
            images,
            metadata,
            out,
            label_column,
            depth,
            skip_errors,
            threads,
        } => {
            let config = EncoderConfig {
                depth,
                label_column,
                on_error: if skip_errors {
                    ErrorPolicy::Skip
                } else {
                    ErrorPolicy::Abort
                },
                n_threads: threads,
                ..EncoderConfig::default()
            };
            run_dataset(tree, images, metadata, out, config)?
        }
    }

    Ok(())
}

fn run_train(images: PathBuf, out: PathBuf, max_images: usize, config: TreeConfig) -> Result<()> {
    let source = NpzImageSource::new(&images);
    let names = source
        .list()
        .with_context(|| format!("failed to list images in {}", images.display()))?;
    if names.is_empty() {
        bail!("no .npz images found in {}", images.display());
    }

    let mut rng = match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let tree = train_from_images(&source, &names, &config, max_images, &mut rng)
        .context("training failed")?;

    tree.save_json(&out)
        .with_context(|| format!("failed to write tree to {}", out.display()))?;
    info!(
        path = %out.display(),
        fingerprint = %tree.fingerprint().to_hex(),
        "tree written"
    );
    Ok(())
}

fn run_encode(tree_path: PathBuf, image: PathBuf) -> Result<()> {
    let tree = load_tree(&tree_path)?;

    let directory = image
        .parent()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    let name = image
        .file_name()
        .and_then(|name| name.to_str())
        .with_context(|| format!("invalid image path {}", image.display()))?;
    let points = NpzImageSource::new(directory)
        .load(name)
        .with_context(|| format!("failed to load image {}", image.display()))?;

    let code = tree.encode(points.view()).context("encoding failed")?;
    for (path, log_ratio) in code {
        let label = if path.is_empty() {
            "-".to_string()
        } else {
            path.to_string()
        };
        println!("{}\t{:.6}", label, log_ratio);
    }
    Ok(())
}

fn run_dump(tree_path: PathBuf, levels: usize, from: Option<NodePath>) -> Result<()> {
    let tree = load_tree(&tree_path)?;
    println!(
        "data_size={}\tdim={}\tnodes={}\tleaves={}\theight={}",
        tree.data_size(),
        tree.dim(),
        tree.node_count(),
        tree.leaf_count(),
        tree.height()
    );
    match from {
        Some(path) => {
            let node = tree
                .find(&path)
                .with_context(|| format!("tree has no node at path '{}'", path))?;
            println!("{}", node.level_dump(levels));
        }
        None => tree.print_levels(levels),
    }
    Ok(())
}

fn run_dataset(
    tree_path: PathBuf,
    images: PathBuf,
    metadata_path: PathBuf,
    out: PathBuf,
    config: EncoderConfig,
) -> Result<()> {
    let tree = load_tree(&tree_path)?;
    let metadata = MetadataTable::from_csv_path(&metadata_path)
        .with_context(|| format!("failed to read metadata {}", metadata_path.display()))?;
    let source = NpzImageSource::new(&images);

    let dataset = EncodedDataset::build(&source, &metadata, &tree, &config)
        .context("dataset encoding failed")?;
    for skipped in dataset.skipped() {
        eprintln!("skipped {}: {}", skipped.name, skipped.reason);
    }

    dataset
        .write_csv(&out)
        .with_context(|| format!("failed to write features to {}", out.display()))?;
    println!(
        "wrote {} rows x {} columns to {}",
        dataset.rows(),
        dataset.cols(),
        out.display()
    );
    Ok(())
}

fn load_tree(path: &Path) -> Result<KdTree> {
    KdTree::load_json(path).with_context(|| format!("failed to load tree from {}", path.display()))
}
