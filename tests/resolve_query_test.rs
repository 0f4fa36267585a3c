use datapilot::engine::AnalysisEngine;
use datapilot::llm::{MockGenerator, OutputKind};
use datapilot::{CodeGenerator, EngineConfig, GenerationError, SourceDescriptor};
use polars::prelude::*;
use std::sync::Arc;

fn sales_frame() -> DataFrame {
    df![
        "month" => ["Jan", "Feb", "Mar", "Apr"],
        "total" => [10.0, 20.0, 30.0, 40.0],
        "região" => ["N", "S", "N", "S"]
    ]
    .unwrap()
}

fn engine_with(backend: Arc<MockGenerator>) -> AnalysisEngine {
    let engine = AnalysisEngine::with_backend(EngineConfig::default(), backend);
    engine
        .load_data(
            "vendas",
            SourceDescriptor::Frame(sales_frame()),
            "sales by month",
            None,
        )
        .unwrap();
    engine
}

const VALID_SCRIPT: &str = "df = execute_sql_query(\"SELECT month, total FROM vendas\")\n\
                            result = {\"type\": \"dataframe\", \"value\": df}";

#[tokio::test]
async fn deterministic_valid_code_succeeds_on_attempt_zero() {
    let backend = Arc::new(MockGenerator::new());
    backend.push_code(VALID_SCRIPT, OutputKind::Dataframe);
    let engine = engine_with(backend.clone());

    let result = engine
        .resolve_query(&["vendas"], "total de vendas por mês")
        .await
        .unwrap();

    assert_eq!(result.type_tag(), "dataframe");
    assert_eq!(backend.calls(), 1);
    assert_eq!(engine.memory_len(), 1);
}

#[tokio::test]
async fn unknown_entity_short_circuits_without_generation() {
    let backend = Arc::new(MockGenerator::new());
    let engine = engine_with(backend.clone());

    let result = engine
        .resolve_query(&[], "Liste os registros da tabela clientes")
        .await
        .unwrap();

    assert_eq!(result.type_tag(), "string");
    let message = match result {
        datapilot::TypedResult::Text(text) => text,
        other => panic!("expected text, got {}", other.type_tag()),
    };
    assert!(message.contains("clientes"));
    assert!(message.contains("vendas"));
    assert_eq!(backend.calls(), 0);
    assert_eq!(engine.memory_len(), 0);
}

#[tokio::test]
async fn unknown_column_triggers_one_reformulation_with_hint() {
    let backend = Arc::new(MockGenerator::new());
    // Attempt 0 references a column that does not exist ("regiao", the
    // accented "região" is the real one).
    backend.push_code(
        "df = execute_sql_query(\"SELECT regiao, total FROM vendas\")\n\
         result = {\"type\": \"dataframe\", \"value\": df}",
        OutputKind::Dataframe,
    );
    backend.push_code(
        "df = execute_sql_query('SELECT \"região\", total FROM vendas')\n\
         result = {\"type\": \"dataframe\", \"value\": df}",
        OutputKind::Dataframe,
    );
    let engine = engine_with(backend.clone());

    let result = engine
        .resolve_query(&[], "totais por regiao")
        .await
        .unwrap();

    assert_eq!(result.type_tag(), "dataframe");
    assert_eq!(backend.calls(), 2);

    // The reformulation prompt carried the diagnostic hint.
    let prompts = backend.prompts();
    assert!(prompts[1].contains("column 'regiao' not found"));
    assert!(prompts[1].contains("closest match 'região'"));

    // Attempt 0 never reaches memory; only the final success does.
    assert_eq!(engine.memory_len(), 1);
}

#[tokio::test]
async fn attempts_are_bounded_and_exhaustion_yields_suggestions() {
    let backend = Arc::new(MockGenerator::new());
    for _ in 0..10 {
        backend.push_code(
            "df = read_host_file(\"/etc/passwd\")\n\
             result = {\"type\": \"dataframe\", \"value\": df}",
            OutputKind::Dataframe,
        );
    }
    let engine = engine_with(backend.clone());

    let result = engine.resolve_query(&[], "algo irrespondível").await.unwrap();

    // 1 original + 3 reformulations, never more.
    assert_eq!(backend.calls(), 4);
    assert_eq!(result.type_tag(), "string");
    let message = match result {
        datapilot::TypedResult::Text(text) => text,
        other => panic!("expected text, got {}", other.type_tag()),
    };
    assert!(message.contains("Could not answer"));
    assert!(message.contains("1."));
    assert!(message.to_lowercase().contains("vendas"));
    assert_eq!(engine.memory_len(), 0);
}

#[tokio::test]
async fn generation_timeout_consumes_one_attempt() {
    let backend = Arc::new(MockGenerator::new());
    backend.push_error(GenerationError::Timeout);
    backend.push_code(VALID_SCRIPT, OutputKind::Dataframe);
    let engine = engine_with(backend.clone());

    let result = engine.resolve_query(&[], "totais por mês").await.unwrap();
    assert_eq!(result.type_tag(), "dataframe");
    assert_eq!(backend.calls(), 2);
}

#[tokio::test]
async fn persistent_syntax_errors_stop_early() {
    let backend = Arc::new(MockGenerator::new());
    for _ in 0..4 {
        backend.push_code(
            "df = execute_sql_query(\"SELEC month FRM vendas\")\n\
             result = {\"type\": \"dataframe\", \"value\": df}",
            OutputKind::Dataframe,
        );
    }
    let engine = engine_with(backend.clone());

    let result = engine.resolve_query(&[], "totais").await.unwrap();
    assert_eq!(result.type_tag(), "string");
    // A syntax failure that survives one reformulation aborts the loop.
    assert_eq!(backend.calls(), 2);
}

#[tokio::test]
async fn accepted_feedback_appends_to_memory() {
    let backend = Arc::new(MockGenerator::new());
    backend.push_code(VALID_SCRIPT, OutputKind::Dataframe);
    let engine = engine_with(backend.clone());

    let result = engine.resolve_query(&[], "totais por mês").await.unwrap();
    assert_eq!(engine.memory_len(), 1);

    engine.record_feedback("totais por mês", &result, true, Some("looks right"));
    assert_eq!(engine.memory_len(), 1);

    // Rejected feedback never grows memory.
    engine.record_feedback("another question", &result, false, Some("wrong"));
    assert_eq!(engine.memory_len(), 1);
}

#[tokio::test]
async fn number_results_are_extracted_from_scalar_frames() {
    let backend = Arc::new(MockGenerator::new());
    backend.push_code(
        "df = execute_sql_query(\"SELECT SUM(total) AS s FROM vendas\")\n\
         result = {\"type\": \"number\", \"value\": df}",
        OutputKind::Number,
    );
    let engine = engine_with(backend.clone());

    let result = engine.resolve_query(&[], "qual o total geral?").await.unwrap();
    match result {
        datapilot::TypedResult::Number(n) => assert_eq!(n, 100.0),
        other => panic!("expected number, got {}", other.type_tag()),
    }
}
