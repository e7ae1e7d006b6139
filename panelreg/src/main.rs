use clap::Parser;
use panelreg::{ClusterSpec, PanelTable, RegressionResultTable, RegressionSpec};
use std::error::Error;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about = "Pooled and fixed-effects panel regressions", long_about = None)]
struct Cli {
    /// Path to the input CSV data file
    #[arg(short, long)]
    data: PathBuf,

    /// Field separator of the input file
    #[arg(long, default_value_t = ',')]
    separator: char,

    /// Entity (individual) identifier column
    #[arg(long, requires = "time")]
    entity: Option<String>,

    /// Time period identifier column
    #[arg(long, requires = "entity")]
    time: Option<String>,

    /// R-style formula for the model (e.g., "inv ~ value + capital")
    #[arg(long, conflicts_with_all = ["outcome", "predictors"])]
    formula: Option<String>,

    /// The name of the column that contains the outcome variable
    #[arg(long)]
    outcome: Option<String>,

    /// A comma-separated string of column names to be used as predictor variables
    #[arg(long, value_delimiter = ',')]
    predictors: Vec<String>,

    /// The estimator [choices: pooled, fe]
    #[arg(long, default_value = "pooled")]
    model: String,

    /// Variance estimator [choices: nonrobust, robust, hc0, hc1, hc2, hc3, cluster]
    #[arg(long, default_value = "nonrobust")]
    vce: String,

    /// Column to cluster standard errors on
    #[arg(long)]
    cluster: Option<String>,

    /// Path to a JSON regression spec, used instead of the model arguments
    #[arg(long, conflicts_with_all = ["formula", "outcome", "predictors", "cluster"])]
    spec: Option<PathBuf>,

    /// Print the panel structure before fitting
    #[arg(long)]
    summary: bool,

    /// Path to export results as JSON
    #[arg(long)]
    output_json: Option<PathBuf>,

    /// Path to export results as Markdown
    #[arg(long)]
    output_markdown: Option<PathBuf>,

    /// Log verbosity level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: tracing::Level,
}

impl Cli {
    fn regression_spec(&self) -> Result<RegressionSpec, Box<dyn Error>> {
        if let Some(path) = &self.spec {
            let json = std::fs::read_to_string(path)?;
            return Ok(RegressionSpec::from_json(&json)?);
        }
        Ok(RegressionSpec {
            formula: self.formula.clone(),
            dependent: self.outcome.clone(),
            independent: self.predictors.clone(),
            regression_type: self.model.clone(),
            vce: self.vce.clone(),
            cluster: self.cluster.clone().map(ClusterSpec::from),
            verbose: false,
        })
    }
}

fn run(cli: &Cli) -> Result<(), Box<dyn Error>> {
    let separator = u8::try_from(cli.separator)
        .map_err(|_| format!("separator must be a single-byte character, got '{}'", cli.separator))?;
    let mut table = PanelTable::from_csv(&cli.data, separator, true)?;
    if let (Some(entity), Some(time)) = (&cli.entity, &cli.time) {
        table.set_panel_key(entity, time, false)?;
    }
    if cli.summary {
        println!("{}\n", table.panel_summary()?);
    }

    let spec = cli.regression_spec()?;
    let fit = table.fit(&spec)?;
    if !spec.verbose {
        fit.summary();
    }

    if let Some(path) = &cli.output_json {
        let json = fit
            .to_json()
            .map_err(|e| format!("Failed to serialize to JSON: {}", e))?;
        std::fs::write(path, json)?;
    }
    if let Some(path) = &cli.output_markdown {
        let md = RegressionResultTable::new(vec![fit]).to_markdown();
        std::fs::write(path, md)?;
    }
    Ok(())
}

fn main() {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(cli.log_level)
        .with_target(false)
        .init();

    if let Err(e) = run(&cli) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
