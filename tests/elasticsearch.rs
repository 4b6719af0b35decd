use std::collections::BTreeMap;

use ideabox::i18n::Languages;
use ideabox::search::elasticsearch::ElasticsearchBackend;
use ideabox::search::{IdeaDocument, SearchBackend, SearchError, SearchQuery};
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn languages() -> Languages {
    Languages::new(["en", "fr"], "en").unwrap()
}

#[tokio::test]
async fn ensure_index_creates_missing_index_with_mapping() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path("/ideas"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/ideas"))
        .and(body_partial_json(json!({
            "mappings": { "properties": {
                "title_fr": { "type": "text" },
                "categories": { "type": "nested" }
            } }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "acknowledged": true })))
        .expect(1)
        .mount(&server)
        .await;

    let es = ElasticsearchBackend::new(&format!("{}/", server.uri()), "ideas");
    es.ensure_index(&languages()).await.unwrap();
}

#[tokio::test]
async fn ensure_index_leaves_existing_index_alone() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD")).and(path("/ideas")).respond_with(ResponseTemplate::new(200)).mount(&server).await;
    Mock::given(method("PUT")).respond_with(ResponseTemplate::new(500)).expect(0).mount(&server).await;

    let es = ElasticsearchBackend::new(&server.uri(), "ideas");
    es.ensure_index(&languages()).await.unwrap();
}

#[tokio::test]
async fn indexes_documents_with_per_language_fields() {
    let server = MockServer::start().await;
    let id = uuid::Uuid::new_v4();
    Mock::given(method("PUT"))
        .and(path(format!("/ideas/_doc/{id}")))
        .and(query_param("refresh", "true"))
        .and(body_partial_json(json!({
            "title_en": "Rain barrels",
            "title_fr": "Barils",
            "categories": [{ "title_en": "Water", "title_fr": "Eau" }]
        })))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let doc = IdeaDocument {
        id,
        titles: BTreeMap::from([("en".into(), "Rain barrels".into()), ("fr".into(), "Barils".into())]),
        contents: BTreeMap::from([("en".into(), "Collect".into()), ("fr".into(), "Collecter".into())]),
        categories: vec![BTreeMap::from([("en".into(), "Water".into()), ("fr".into(), "Eau".into())])],
    };
    let es = ElasticsearchBackend::new(&server.uri(), "ideas");
    es.index_idea(&doc).await.unwrap();
}

#[tokio::test]
async fn search_returns_hit_ids_and_skips_malformed_ones() {
    let server = MockServer::start().await;
    let a = uuid::Uuid::new_v4();
    let b = uuid::Uuid::new_v4();
    Mock::given(method("POST"))
        .and(path("/ideas/_search"))
        .and(body_partial_json(json!({ "from": 10, "size": 5 })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "took": 3,
            "hits": { "total": { "value": 13 }, "hits": [
                { "_id": a.to_string(), "_score": 2.0 },
                { "_id": "legacy-42", "_score": 1.5 },
                { "_id": b.to_string(), "_score": 1.0 }
            ] }
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/ideas/_count"))
        .and(body_partial_json(json!({ "query": { "bool": { "minimum_should_match": 1 } } })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "count": 13 })))
        .mount(&server)
        .await;

    let es = ElasticsearchBackend::new(&server.uri(), "ideas");
    let query = SearchQuery::new(Some("compost"), "en");
    assert_eq!(es.search(&query, 10, 5).await.unwrap(), vec![a, b]);
    assert_eq!(es.count(&query).await.unwrap(), 13);
}

#[tokio::test]
async fn removing_unknown_document_is_ok_but_errors_surface() {
    let server = MockServer::start().await;
    let gone = uuid::Uuid::new_v4();
    let broken = uuid::Uuid::new_v4();
    Mock::given(method("DELETE"))
        .and(path(format!("/ideas/_doc/{gone}")))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({ "result": "not_found" })))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path(format!("/ideas/_doc/{broken}")))
        .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
        .mount(&server)
        .await;

    let es = ElasticsearchBackend::new(&server.uri(), "ideas");
    es.remove_idea(gone).await.unwrap();
    match es.remove_idea(broken).await {
        Err(SearchError::Backend(msg)) => assert!(msg.contains("503"), "{msg}"),
        other => panic!("expected backend error, got {other:?}"),
    }
}
