//! Client integration tests against a mock query service.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::json;
use skiff_datalog::{
    DatalogClient, DatalogError, Entity, HttpClient, MessagePublisher, NamedQuery, Params,
    QueryDefaults, QueryMode, QueryOptions, QueryResult, RetryPolicy, TopicRegistry,
    TopicSettings, TransactOptions, TransactTarget,
};
use skiff_types::{CompletionRegistry, SkillDescriptor};
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const COMMITS: &str = "[:find (pull ?c [*]) :in $ $before-db % :where [?c :git.commit/sha ?sha]]";

const COMMIT_ROWS: &str = r#"[[{:schema/entity-type :git/commit :git.commit/sha "abc" :git.commit/message "init"}]
 [{:schema/entity-type :git/commit :git.commit/sha "def" :git.commit/message "second"}]]"#;

fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        attempts: 3,
        min_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(2),
        jitter: false,
        ..RetryPolicy::default()
    }
}

fn client_for(server: &MockServer) -> DatalogClient {
    DatalogClient::builder()
        .endpoint(server.uri())
        .workspace_id("T1")
        .api_key("secret-key")
        .correlation_id("corr-1")
        .skill(SkillDescriptor::new("atomist", "go-sample-skill"))
        .retry_policy(fast_policy())
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_identical_queries_hit_the_service_once() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/team/T1"))
        .and(header("authorization", "bearer secret-key"))
        .and(header("content-type", "application/edn"))
        .and(body_string_contains("[(untuple ?args) [?sha]]"))
        .respond_with(ResponseTemplate::new(200).set_body_string(COMMIT_ROWS))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let params = Params::new().with("sha", "abc");
    let first = client.query(COMMITS, &params, QueryOptions::new()).await?;
    let second = client.query(COMMITS, &params, QueryOptions::new()).await?;

    assert_eq!(first, second);
    assert_eq!(
        first.rows(),
        &[
            json!({ "commit": { "sha": "abc", "message": "init" } }),
            json!({ "commit": { "sha": "def", "message": "second" } }),
        ]
    );
    assert_eq!(client.cache().hits(), 1);
    Ok(())
}

#[tokio::test]
async fn test_raw_mode_returns_response_text() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string(COMMIT_ROWS))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let result = client
        .query(COMMITS, &Params::new(), QueryOptions::new().mode(QueryMode::Raw))
        .await?;
    assert_eq!(result, QueryResult::Raw(COMMIT_ROWS.to_string()));
    Ok(())
}

#[tokio::test]
async fn test_subscription_defaults_nest_results() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_string_contains(":tx-range {:start 42 }"))
        .and(body_string_contains(":configuration-name \"default\""))
        .respond_with(ResponseTemplate::new(200).set_body_string(format!(
            "[{{:result {COMMIT_ROWS}}}]"
        )))
        .expect(1)
        .mount(&server)
        .await;

    let client = DatalogClient::builder()
        .endpoint(server.uri())
        .workspace_id("T1")
        .api_key("k")
        .defaults(QueryDefaults {
            tx: Some(42),
            configuration_name: Some("default".to_string()),
        })
        .build()?;

    let rows = client.query(COMMITS, &Params::new(), QueryOptions::new()).await?;
    assert_eq!(rows.rows().len(), 2);
    assert_eq!(rows.rows()[0]["commit"]["sha"], "abc");
    Ok(())
}

#[tokio::test]
async fn test_query_as_deserializes_rows() -> Result<()> {
    #[derive(serde::Deserialize)]
    struct Row {
        commit: Commit,
    }
    #[derive(serde::Deserialize)]
    struct Commit {
        sha: String,
    }

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string(COMMIT_ROWS))
        .mount(&server)
        .await;

    let rows: Vec<Row> = client_for(&server)
        .query_as(COMMITS, &Params::new(), QueryOptions::new())
        .await?;
    let shas: Vec<_> = rows.iter().map(|r| r.commit.sha.as_str()).collect();
    assert_eq!(shas, vec!["abc", "def"]);
    Ok(())
}

#[tokio::test]
async fn test_transient_status_is_retried() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string("[]"))
        .expect(1)
        .mount(&server)
        .await;

    let result = client_for(&server)
        .query(COMMITS, &Params::new(), QueryOptions::new())
        .await?;
    assert!(result.rows().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_client_error_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(400).set_body_string("bad query"))
        .expect(1)
        .mount(&server)
        .await;

    let err = client_for(&server)
        .query(COMMITS, &Params::new(), QueryOptions::new())
        .await
        .unwrap_err();
    match err {
        DatalogError::Http { status, body } => {
            assert_eq!(status, 400);
            assert_eq!(body, "bad query");
        }
        other => panic!("Expected Http error, got: {other:?}"),
    }
}

#[tokio::test]
async fn test_query_batch_returns_results_by_name() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_string_contains("{:queries ["))
        .and(body_string_contains(":name \"commits\""))
        .and(body_string_contains(":name \"count\""))
        .respond_with(ResponseTemplate::new(200).set_body_string(format!(
            "{{:commits {COMMIT_ROWS} :count [[3]]}}"
        )))
        .expect(1)
        .mount(&server)
        .await;

    let results = client_for(&server)
        .query_batch(vec![
            NamedQuery::new("commits", COMMITS),
            NamedQuery::new("count", "[:find (count ?c) :where [?c :git.commit/sha]]")
                .options(QueryOptions::new().mode(QueryMode::Raw)),
        ])
        .await?;

    assert_eq!(results["commits"].rows().len(), 2);
    assert_eq!(results["count"].as_raw(), Some("[[3]]"));
    Ok(())
}

#[tokio::test]
async fn test_transact_rejects_undefined_attributes_before_sending() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let client = DatalogClient::builder()
        .endpoint(server.uri())
        .workspace_id("T1")
        .api_key("k")
        .transact_target(TransactTarget::Http {
            url: format!("{}/transact", server.uri()),
            token: "tok".to_string(),
        })
        .build()
        .unwrap();

    let mut record = Entity::with_ref("git/repo", "$repo").attr("name", "skiff").to_record();
    record.insert("git.repo/url", None);

    let err = client
        .transact([record], TransactOptions::default())
        .await
        .unwrap_err();
    assert!(err.is_validation(), "got {err:?}");
    assert_eq!(client.transaction_stats().entities, 0);
}

#[tokio::test]
async fn test_transact_over_http_records_stats() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/transact"))
        .and(header("authorization", "Bearer tok"))
        .and(body_string_contains("{:transactions [{:data [{:schema/entity-type :git/repo"))
        .and(body_string_contains(":ordering-key \"corr-1\""))
        .respond_with(ResponseTemplate::new(202))
        .expect(2)
        .mount(&server)
        .await;

    let completion = CompletionRegistry::new();
    let client = DatalogClient::builder()
        .endpoint(server.uri())
        .workspace_id("T1")
        .api_key("k")
        .correlation_id("corr-1")
        .retry_policy(fast_policy())
        .transact_target(TransactTarget::Http {
            url: format!("{}/transact", server.uri()),
            token: "tok".to_string(),
        })
        .completion(completion.clone())
        .build()?;

    let repo = Entity::with_ref("git/repo", "$repo")
        .attr("name", "skiff")
        .attr("url", "https://github.com/dstorey/skiff");
    client.transact([&repo], TransactOptions::default()).await?;
    client.transact([repo], TransactOptions::default()).await?;

    let stats = client.transaction_stats();
    assert_eq!(stats.entities, 2);
    assert_eq!(stats.facts, 4);

    // One stats callback regardless of the number of transactions.
    assert_eq!(completion.len(), 1);
    let report = completion.close().await;
    assert_eq!(report.completed, 1);
    assert_eq!(report.failed, 0);
    Ok(())
}

#[tokio::test]
async fn test_transact_over_topic() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/projects/proj/topics/facts:publish"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "messageIds": ["m-1"] })),
        )
        .expect(2)
        .mount(&server)
        .await;

    let registry = TopicRegistry::new(
        HttpClient::new(Duration::from_secs(5))?,
        TopicSettings {
            base_url: server.uri(),
            project_id: "proj".to_string(),
            token: None,
        },
        fast_policy(),
    );
    let publisher: Arc<dyn MessagePublisher> = registry.topic("facts");

    let client = DatalogClient::builder()
        .endpoint(server.uri())
        .workspace_id("T1")
        .api_key("k")
        .correlation_id("corr-1")
        .transact_target(TransactTarget::Topic(publisher))
        .build()?;

    client
        .transact(
            [Entity::with_ref("git/repo", "$repo").attr("name", "skiff")],
            TransactOptions::unordered(),
        )
        .await?;
    client
        .retract("[:find ?r :where [?r :git.repo/name \"old\"]]", TransactOptions::default())
        .await?;

    let requests = server.received_requests().await.unwrap_or_default();
    assert_eq!(requests.len(), 2);

    let decode = |body: &[u8]| -> Result<serde_json::Value> {
        let envelope: serde_json::Value = serde_json::from_slice(body)?;
        let data = envelope["messages"][0]["data"].as_str().unwrap_or_default();
        Ok(json!({
            "ordering_key": envelope["messages"][0]["ordering_key"],
            "message": serde_json::from_slice::<serde_json::Value>(&BASE64.decode(data)?)?,
        }))
    };

    let ingestion = decode(&requests[0].body)?;
    assert!(ingestion["ordering_key"].is_null());
    assert_eq!(ingestion["message"]["type"], "facts_ingestion");
    assert_eq!(ingestion["message"]["team"]["id"], "T1");
    assert_eq!(
        ingestion["message"]["entities"],
        r#"[{:schema/entity-type :git/repo :schema/entity "$repo" :git.repo/name "skiff"}]"#
    );

    let retraction = decode(&requests[1].body)?;
    assert_eq!(retraction["ordering_key"], "corr-1");
    assert_eq!(retraction["message"]["type"], "facts_retraction");
    assert_eq!(
        retraction["message"]["query"],
        "[:find ?r :where [?r :git.repo/name \"old\"]]"
    );
    Ok(())
}

#[tokio::test]
async fn test_transact_without_target_is_config_error() {
    let client = DatalogClient::builder()
        .workspace_id("T1")
        .api_key("k")
        .build()
        .unwrap();
    let err = client
        .transact([Entity::new("git/repo").attr("name", "x")], TransactOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, DatalogError::Config(_)), "got {err:?}");
}
