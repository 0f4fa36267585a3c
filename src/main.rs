use anyhow::Result;
use clap::Parser;
use datapilot::response::ResultPayload;
use datapilot::{AnalysisEngine, EngineConfig, SourceDescriptor};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "datapilot")]
#[command(about = "Ask natural-language questions about tabular data files")]
struct Args {
    /// The question in natural language (or SQL with --sql)
    question: String,

    /// Data files to load as datasets (CSV, Parquet or JSON); the file stem
    /// becomes the dataset id
    #[arg(short, long = "data", required = true)]
    data: Vec<PathBuf>,

    /// Treat the input as a SQL statement and run it directly
    #[arg(long)]
    sql: bool,

    /// Free-text feedback folded into generation as a refinement hint
    #[arg(long)]
    feedback: Option<String>,

    /// Also render the answer as a chart descriptor when possible
    #[arg(long)]
    visualize: bool,

    /// Backend API key (or set OPENAI_API_KEY; without one the offline mock
    /// backend is used)
    #[arg(long)]
    api_key: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    let mut config = EngineConfig::from_env();
    if let Some(key) = args.api_key {
        config.api_key = key;
    }

    let engine = AnalysisEngine::new(config);

    for path in &args.data {
        let id = path
            .file_stem()
            .and_then(|s| s.to_str())
            .map(|s| s.to_string())
            .unwrap_or_else(|| "data".to_string());
        let source = SourceDescriptor::from_path(path).map_err(datapilot::EngineError::from)?;
        engine.load_data(&id, source, "", None)?;
        info!(dataset = id.as_str(), path = %path.display(), "loaded dataset");
    }

    let result = if args.sql {
        engine.execute_direct_sql(&args.question)?
    } else {
        engine
            .resolve_query_with_feedback(&args.question, args.feedback.as_deref())
            .await?
    };

    let payload = ResultPayload::from_result(&result, &args.question)?;
    println!("{}", serde_json::to_string_pretty(&payload)?);

    if args.visualize && result.type_tag() == "dataframe" {
        match engine.request_visualization(None, None, None, None, None) {
            Ok(chart) => println!("\n{}", serde_json::to_string_pretty(&chart.to_json()?)?),
            Err(e) => eprintln!("could not build a chart from this result: {e}"),
        }
    }

    Ok(())
}
