mod clades;
mod nhx;
mod palette;
mod paper;
mod plot;
mod render;
mod sizing;
mod table;
mod taxa;
mod tree;

use std::path::PathBuf;
use std::process;

use anyhow::{Context, Result};
use chrono::Local;
use clap::{ArgAction, Parser};
use log::{debug, error, info};

use crate::palette::{ColorPalette, ShapePalette};
use crate::paper::PaperSize;
use crate::plot::{TipStyling, TreePlot};
use crate::sizing::LabelSizes;
use crate::table::Metadata;
use crate::tree::{MutationIndex, TreeLayout};

#[derive(Parser)]
#[command(author, version, about = "Render an annotated phylogenetic tree with clade labels", long_about = None)]
struct Cli {
    /// Tree in Newick format with NHX annotations (`aa_muts` marks mutations).
    #[arg(short = 't', long = "tree", value_name = "FILE")]
    tree: PathBuf,

    /// Output document; `.svg` and `.png` select those formats, anything else is PDF.
    #[arg(short = 'o', long = "output", value_name = "FILE")]
    output: PathBuf,

    /// Clade table with `clade` and `aa_muts` columns.
    #[arg(short = 'c', long = "clades", value_name = "FILE")]
    clades: PathBuf,

    /// Metadata table; the first column holds tip names.
    #[arg(short = 'm', long = "metaFile", value_name = "FILE")]
    meta_file: PathBuf,

    /// Metadata column coloring tip labels.
    #[arg(short = 'l', long = "colorTaxa", value_name = "COLUMN")]
    color_taxa: String,

    /// Metadata column coloring and shaping tip points.
    #[arg(short = 'p', long = "tipPoint", value_name = "COLUMN")]
    tip_point: String,

    /// Plot title; today's date is appended.
    #[arg(short = 'g', long = "title")]
    title: String,

    /// Paper size code such as A4p or A3l.
    #[arg(short = 's', long = "paperSize", default_value = paper::DEFAULT_PAPER_SIZE)]
    paper_size: String,

    /// Category-to-color table.
    #[arg(long = "colorPalette", env = "CLADE_TREE_COLOR_PALETTE", value_name = "FILE")]
    color_palette: Option<PathBuf>,

    /// Category-to-shape table.
    #[arg(long = "shapePalette", env = "CLADE_TREE_SHAPE_PALETTE", value_name = "FILE")]
    shape_palette: Option<PathBuf>,

    /// Increase log detail (-v debug, -vv trace).
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    verbose: u8,
}

fn main() {
    let cli = Cli::parse();

    env_logger::Builder::new()
        .filter_level(match cli.verbose {
            0 => log::LevelFilter::Info,
            1 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        })
        .parse_default_env()
        .init();

    if let Err(err) = draw_clade_tree(&cli) {
        error!("{:#}", err);
        process::exit(1);
    }
}

fn draw_clade_tree(cli: &Cli) -> Result<()> {
    // Everything is read and validated before the output file is touched.
    let paper = PaperSize::from_code(&cli.paper_size)?;
    let tree = nhx::read_tree(&cli.tree)?;
    info!(
        "Loaded tree with {} tips and {} nodes",
        tree.tips().len(),
        tree.node_count()
    );

    let metadata = Metadata::read(&cli.meta_file)?;
    let label_column = metadata.attribute(&cli.color_taxa)?;
    let point_column = metadata.attribute(&cli.tip_point)?;
    let clade_rows = table::read_clades(&cli.clades)?;
    let colors = match &cli.color_palette {
        Some(path) => ColorPalette::read(path)?,
        None => ColorPalette::empty(),
    };
    let shapes = match &cli.shape_palette {
        Some(path) => ShapePalette::read(path)?,
        None => ShapePalette::empty(),
    };

    taxa::check_taxa(&tree.tip_labels(), &metadata.taxa());

    let index = MutationIndex::build(&tree);
    debug!("Indexed {} distinct mutations", index.mutation_count());
    let resolved = clades::resolve_clades(&clade_rows, &index);
    info!("Labelling {} clades", resolved.len());

    let layout = TreeLayout::compute(&tree);
    let offsets = clades::clade_offsets(layout.width(), resolved.len())?;
    let sizes = LabelSizes::for_page(paper.height_mm, tree.node_count())?;
    debug!("Tip label size {:.3} mm", sizes.tip_label);

    let title = plot::stamped_title(&cli.title, Local::now().date_naive());
    let styling = TipStyling {
        metadata: &metadata,
        label_column: &label_column,
        point_column: &point_column,
        colors: &colors,
        shapes: &shapes,
    };
    let plot = TreePlot::build(tree, layout, &styling, &resolved, &offsets, sizes, title);

    render::render_plot(&cli.output, paper, &plot)
        .with_context(|| format!("Failed to render {:?}", cli.output))?;
    info!("Wrote annotated tree to {}", cli.output.display());
    Ok(())
}
