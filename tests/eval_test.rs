mod helpers;

use std::fs;
use std::sync::{Arc, Mutex};

use rusqlite::Connection;
use serde_json::Value;

use memrag::ingest::{ingest_corpus, IngestOptions};
use memrag::jsonl::append_jsonl;
use memrag::memory::create_session;
use memrag::providers::cached::Embedder;
use memrag::rag::types::{MemoryBlend, PipelineConfig};

use helpers::{test_db, FixedChat, KeywordEmbed};

fn config() -> PipelineConfig {
    PipelineConfig {
        chunk_size_tokens: 800,
        overlap_tokens: 100,
        top_k: 2,
        rewrite: false,
        rerank: false,
        context_budget_tokens: 6000,
        memory_blend: MemoryBlend::DocsOnly,
    }
}

async fn seed(db: &Arc<Mutex<Connection>>, embedder: &Embedder) {
    let corpus = tempfile::tempdir().unwrap();
    fs::write(corpus.path().join("alpha.md"), "alpha beta are covered here").unwrap();
    fs::write(corpus.path().join("gamma.md"), "gamma delta live in this file").unwrap();
    ingest_corpus(
        db,
        embedder,
        &IngestOptions {
            corpus_path: corpus.path().to_path_buf(),
            chunk_size_tokens: 800,
            overlap_tokens: 100,
        },
    )
    .await
    .unwrap();
}

fn session_id(db: &Arc<Mutex<Connection>>) -> String {
    let conn = db.lock().unwrap();
    create_session(&conn).unwrap().id
}

#[tokio::test]
async fn eval_scores_questions_and_snapshots_the_config() {
    let db = test_db();
    let embedder = Embedder::new(db.clone(), Box::new(KeywordEmbed));
    seed(&db, &embedder).await;

    let dir = tempfile::tempdir().unwrap();
    let questions_path = dir.path().join("questions.jsonl");
    append_jsonl(
        &questions_path,
        &serde_json::json!({
            "id": "q1",
            "question": "tell me about alpha beta",
            "expected_sources": ["alpha.md"]
        }),
    )
    .unwrap();
    append_jsonl(
        &questions_path,
        &serde_json::json!({
            "id": "q2",
            "question": "where do gamma delta live?",
            "expected_sources": ["nonexistent.md"]
        }),
    )
    .unwrap();

    let answer = FixedChat::new("Covered in [S1].");
    let judge = FixedChat::new(
        r#"{ "correctness": 5, "groundedness": 4, "memoryUse": 0, "clarity": 5, "notes": "fine" }"#,
    );
    let session = session_id(&db);
    let pipeline_config = config();

    let out_dir = dir.path().join("eval-run");
    let outcome = memrag::eval::run_eval(
        memrag::eval::EvalRun {
            db: &db,
            embedder: &embedder,
            answer_chat: &answer,
            support_chat: None,
            judge_chat: &judge,
            config: &pipeline_config,
            session_id: &session,
        },
        &memrag::eval::RunEvalOptions {
            questions_path,
            out_dir: out_dir.clone(),
            limit: None,
            enable_memory_writes: false,
            cost_model_path: None,
            pricing_path: None,
        },
    )
    .await
    .unwrap();

    assert_eq!(outcome.count, 2);

    // The exact config used is snapshotted beside the results
    let snapshot: PipelineConfig =
        serde_json::from_str(&fs::read_to_string(out_dir.join("config.json")).unwrap()).unwrap();
    assert_eq!(snapshot.content_hash(), pipeline_config.content_hash());

    let rows: Vec<Value> = fs::read_to_string(&outcome.results_path)
        .unwrap()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(rows.len(), 2);

    // q1 expected alpha.md and retrieval found it
    assert_eq!(rows[0]["id"], "q1");
    assert_eq!(rows[0]["recallAtK"], 1);
    // q2 expected a path that is not in the corpus
    assert_eq!(rows[1]["recallAtK"], 0);

    let expected_score = 0.4 * 5.0 + 0.4 * 4.0 + 0.2 * 0.0;
    for row in &rows {
        assert_eq!(row["configHash"], pipeline_config.content_hash());
        let score = row["weightedScore"].as_f64().unwrap();
        assert!((score - expected_score).abs() < 1e-9);
        assert!(row["timingsMs"]["generate"].as_f64().is_some());
        // Memory writes were off
        assert!(row.get("memoryWrite").is_none());
    }
}

#[tokio::test]
async fn eval_limit_caps_the_question_count() {
    let db = test_db();
    let embedder = Embedder::new(db.clone(), Box::new(KeywordEmbed));
    seed(&db, &embedder).await;

    let dir = tempfile::tempdir().unwrap();
    let questions_path = dir.path().join("questions.jsonl");
    for i in 0..5 {
        append_jsonl(
            &questions_path,
            &serde_json::json!({ "id": format!("q{i}"), "question": "alpha beta?" }),
        )
        .unwrap();
    }

    let answer = FixedChat::new("Covered in [S1].");
    let judge = FixedChat::new(
        r#"{ "correctness": 3, "groundedness": 3, "memoryUse": 0, "clarity": 3 }"#,
    );
    let session = session_id(&db);
    let pipeline_config = config();

    let outcome = memrag::eval::run_eval(
        memrag::eval::EvalRun {
            db: &db,
            embedder: &embedder,
            answer_chat: &answer,
            support_chat: None,
            judge_chat: &judge,
            config: &pipeline_config,
            session_id: &session,
        },
        &memrag::eval::RunEvalOptions {
            questions_path,
            out_dir: dir.path().join("limited"),
            limit: Some(2),
            enable_memory_writes: false,
            cost_model_path: None,
            pricing_path: None,
        },
    )
    .await
    .unwrap();
    assert_eq!(outcome.count, 2);
}

#[tokio::test]
async fn unparsable_judge_output_leaves_result_unscored() {
    let db = test_db();
    let embedder = Embedder::new(db.clone(), Box::new(KeywordEmbed));
    seed(&db, &embedder).await;

    let dir = tempfile::tempdir().unwrap();
    let questions_path = dir.path().join("questions.jsonl");
    append_jsonl(
        &questions_path,
        &serde_json::json!({ "id": "q1", "question": "alpha beta?" }),
    )
    .unwrap();

    let answer = FixedChat::new("Covered in [S1].");
    let judge = FixedChat::new("I refuse to emit JSON today.");
    let session = session_id(&db);

    let outcome = memrag::eval::run_eval(
        memrag::eval::EvalRun {
            db: &db,
            embedder: &embedder,
            answer_chat: &answer,
            support_chat: None,
            judge_chat: &judge,
            config: &config(),
            session_id: &session,
        },
        &memrag::eval::RunEvalOptions {
            questions_path,
            out_dir: dir.path().join("unscored"),
            limit: None,
            enable_memory_writes: false,
            cost_model_path: None,
            pricing_path: None,
        },
    )
    .await
    .unwrap();
    assert_eq!(outcome.count, 1);

    let rows: Vec<Value> = fs::read_to_string(&outcome.results_path)
        .unwrap()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert!(rows[0].get("judge").is_none());
    assert!(rows[0].get("weightedScore").is_none());
    // The answer itself is still recorded
    assert_eq!(rows[0]["answer"], "Covered in [S1].");
}
