#![cfg(feature = "inmem-store")]

use std::io::Cursor;
use std::sync::Arc;

use actix_web::{test, web, App};
use ideabox::auth::{create_jwt, Role};
use ideabox::config::Settings;
use ideabox::i18n::{Languages, Multilingual};
use ideabox::models::NewCategory;
use ideabox::repo::inmem::InMemRepo;
use ideabox::repo::{CategoryRepo, IdeaRepo};
use ideabox::search::text_index::TextIndex;
use ideabox::storage::FsMediaStore;
use ideabox::{config, AppState};
use serde_json::{json, Value};
use serial_test::serial;

fn setup_env() {
    std::env::set_var("JWT_SECRET", "test-secret-must-be-32-bytes-long!!");
}

fn user_token(id: i64, username: &str) -> String {
    create_jwt(id, username, None, vec![Role::User]).unwrap()
}

fn admin_token() -> String {
    create_jwt(99, "admin", Some("Site Admin"), vec![Role::Admin]).unwrap()
}

fn bearer(token: &str) -> (&'static str, String) {
    ("Authorization", format!("Bearer {token}"))
}

/// Fresh state: in-memory repo, media under a temp dir, in-memory text index.
fn state(media_root: &std::path::Path, page_size: usize) -> AppState {
    let languages = Languages::new(["en", "fr", "de"], "en").unwrap();
    let mut settings = Settings::for_languages(languages.clone());
    settings.page_size = page_size;
    settings.media_root = media_root.to_path_buf();
    AppState {
        repo: Arc::new(InMemRepo::new("en")),
        media: Arc::new(FsMediaStore::new(media_root)),
        search: Arc::new(TextIndex::in_memory(&languages).unwrap()),
        settings,
    }
}

fn build_multipart(form: &Value, picture: Option<(&str, &[u8])>, boundary: &str) -> (String, Vec<u8>) {
    let mut body: Vec<u8> = Vec::new();
    let part = format!(
        "--{boundary}\r\nContent-Disposition: form-data; name=\"idea\"\r\nContent-Type: application/json\r\n\r\n{form}\r\n"
    );
    body.extend_from_slice(part.as_bytes());
    if let Some((file_name, bytes)) = picture {
        let disp = format!("--{boundary}\r\nContent-Disposition: form-data; name=\"picture\"; filename=\"{file_name}\"\r\nContent-Type: application/octet-stream\r\n\r\n");
        body.extend_from_slice(disp.as_bytes());
        body.extend_from_slice(bytes);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());
    (format!("multipart/form-data; boundary={boundary}"), body)
}

fn sample_png() -> Vec<u8> {
    let img = image::RgbImage::from_pixel(64, 32, image::Rgb([30, 140, 60]));
    let mut buf = Vec::new();
    image::DynamicImage::ImageRgb8(img).write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png).unwrap();
    buf
}

fn post_idea(uri: &str, token: &str, form: &Value, picture: Option<(&str, &[u8])>) -> test::TestRequest {
    let (ct, body) = build_multipart(form, picture, "XBOUNDARYX");
    test::TestRequest::post()
        .uri(uri)
        .insert_header(bearer(token))
        .insert_header(("Content-Type", ct))
        .set_payload(body)
}

async fn json_body(resp: actix_web::dev::ServiceResponse) -> Value {
    serde_json::from_slice(&test::read_body(resp).await).unwrap()
}

#[actix_web::test]
#[serial]
async fn create_edit_like_handout_delete_flow() {
    setup_env();
    let media = tempfile::tempdir().unwrap();
    let st = state(media.path(), 24);
    let app = test::init_service(App::new().app_data(web::Data::new(st.clone())).configure(config)).await;
    let ada = user_token(1, "ada");

    // categories: admins only
    let req = test::TestRequest::post()
        .uri("/api/v1/categories")
        .insert_header(bearer(&ada))
        .set_json(json!({ "title": { "en": "Energy" } }))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 403);
    let req = test::TestRequest::post()
        .uri("/api/v1/categories")
        .insert_header(bearer(&admin_token()))
        .set_json(json!({ "title": { "en": "Energy", "fr": "Énergie" } }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 201);
    let category_id = json_body(resp).await["id"].as_i64().unwrap();

    // create requires a token
    let (ct, body) = build_multipart(&json!({}), None, "XBOUNDARYX");
    let req = test::TestRequest::post()
        .uri("/api/v1/ideas/new")
        .insert_header(("Content-Type", ct))
        .set_payload(body)
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 401);

    let form = json!({
        "title": { "en": "Solar roofs", "fr": "Toits solaires" },
        "content": { "en": "Panels on every roof." },
        "categories": [category_id],
        "rating": 4,
        "translations": [{ "language": "de", "title": "Solardächer", "content": "Paneele überall." }]
    });
    let png = sample_png();
    let resp = test::call_service(&app, post_idea("/api/v1/ideas/new", &ada, &form, Some(("Roof.PNG", &png))).to_request()).await;
    assert_eq!(resp.status(), 201);
    let created = json_body(resp).await;
    let id = created["id"].as_str().unwrap().to_string();
    assert_eq!(created["url"], format!("/api/v1/ideas/{id}"));
    assert_eq!(created["rating"]["label"], "★★★★☆");
    assert_eq!(created["author"]["username"], "ada");

    // original and the three variants are stored
    let original = st.repo.get_idea(id.parse().unwrap()).await.unwrap().picture.unwrap();
    assert!(original.ends_with(&format!("{id}.png")));
    let social = created["picture"]["social"].as_str().unwrap().trim_start_matches("/media/").to_string();
    let img = image::open(media.path().join(&social)).unwrap();
    assert_eq!((img.width(), img.height()), (1024, 512));
    for key in ["original", "large", "thumbnail"] {
        let rel = created["picture"][key].as_str().unwrap().trim_start_matches("/media/");
        assert!(media.path().join(rel).exists(), "{key} missing");
    }
    let req = test::TestRequest::get().uri(created["picture"]["large"].as_str().unwrap()).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers().get("Content-Type").unwrap(), "image/png");

    // detail in the active language
    let req = test::TestRequest::get().uri(&format!("/api/v1/ideas/{id}?lang=de")).to_request();
    let detail = json_body(test::call_service(&app, req).await).await;
    assert_eq!(detail["idea"]["title"], "Solardächer");
    assert_eq!(detail["structured_data"]["@type"], "CreativeWork");
    assert_eq!(detail["structured_data"]["inLanguage"], "de");
    assert_eq!(detail["likes"], 0);
    assert!(detail["liked"].is_null());
    let req = test::TestRequest::get()
        .uri(&format!("/api/v1/ideas/{id}"))
        .insert_header(("Accept-Language", "fr-CA,fr;q=0.9"))
        .to_request();
    let detail = json_body(test::call_service(&app, req).await).await;
    assert_eq!(detail["idea"]["title"], "Toits solaires");
    assert_eq!(detail["idea"]["categories"][0]["title"], "Énergie");

    // same title, same author
    let dup = json!({ "title": { "en": "Solar roofs" }, "content": { "en": "Again" } });
    let resp = test::call_service(&app, post_idea("/api/v1/ideas/new", &ada, &dup, None).to_request()).await;
    assert_eq!(resp.status(), 400);
    let err = json_body(resp).await;
    assert_eq!(err["fields"]["__all__"][0], "Each idea of the same user should have a unique title.");
    // same title, other author
    let bob = user_token(2, "bob");
    let resp = test::call_service(&app, post_idea("/api/v1/ideas/new", &bob, &dup, None).to_request()).await;
    assert_eq!(resp.status(), 201);

    // edit form lists the existing translation rows
    let req = test::TestRequest::get().uri(&format!("/api/v1/ideas/{id}/edit")).insert_header(bearer(&ada)).to_request();
    let edit = json_body(test::call_service(&app, req).await).await;
    let rows = edit["form"]["translations"].as_array().unwrap();
    assert_eq!(rows.len(), 1);
    let de_row = rows[0]["id"].as_i64().unwrap();

    // delete the German row, add a French one, change the parent title
    let form = json!({
        "title": { "en": "Solar roofs for all" },
        "content": { "en": "Panels on every roof." },
        "categories": [category_id],
        "rating": 5,
        "translations": [
            { "id": de_row, "language": "de", "title": "Solardächer", "content": "x", "delete": true },
            { "language": "fr", "title": "Toits pour tous", "content": "Des panneaux." }
        ]
    });
    let resp = test::call_service(&app, post_idea(&format!("/api/v1/ideas/{id}/edit"), &ada, &form, None).to_request()).await;
    assert_eq!(resp.status(), 200);
    let updated = json_body(resp).await;
    assert_eq!(updated["title"], "Solar roofs for all");
    assert_eq!(updated["picture"]["original"], created["picture"]["original"]);
    let rows = st.repo.list_translations(id.parse().unwrap()).await.unwrap();
    assert_eq!(rows.iter().map(|t| t.language.as_str()).collect::<Vec<_>>(), vec!["fr"]);

    // search follows saves
    let req = test::TestRequest::get().uri("/api/v1/ideas/search?q=solar").to_request();
    let found = json_body(test::call_service(&app, req).await).await;
    assert_eq!(found["page"]["count"], 2);
    let req = test::TestRequest::get().uri("/api/v1/ideas/search?q=energy").to_request();
    let found = json_body(test::call_service(&app, req).await).await;
    assert_eq!(found["items"][0]["id"], id.as_str());

    // likes toggle
    let like = |token: &str| {
        test::TestRequest::post().uri(&format!("/api/v1/ideas/{id}/like")).insert_header(bearer(token)).to_request()
    };
    let v = json_body(test::call_service(&app, like(&bob)).await).await;
    assert_eq!((v["liked"].as_bool(), v["count"].as_u64()), (Some(true), Some(1)));
    let v = json_body(test::call_service(&app, like(&ada)).await).await;
    assert_eq!(v["count"], 2);
    let v = json_body(test::call_service(&app, like(&bob)).await).await;
    assert_eq!((v["liked"].as_bool(), v["count"].as_u64()), (Some(false), Some(1)));

    // handout
    let req = test::TestRequest::get().uri(&format!("/api/v1/ideas/{id}/handout.pdf")).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers().get("Content-Type").unwrap(), "application/pdf");
    let disposition = resp.headers().get("Content-Disposition").unwrap().to_str().unwrap().to_string();
    assert!(disposition.starts_with("inline; filename="));
    assert!(disposition.ends_with("-solar-roofs-for-all-handout.pdf"), "{disposition}");
    assert!(test::read_body(resp).await.starts_with(b"%PDF"));

    // delete: confirmation, then removal of files, row and index entry
    let req = test::TestRequest::get().uri(&format!("/api/v1/ideas/{id}/delete")).insert_header(bearer(&ada)).to_request();
    let confirm = json_body(test::call_service(&app, req).await).await;
    assert_eq!(confirm["confirm_url"], format!("/api/v1/ideas/{id}/delete"));
    let req = test::TestRequest::post().uri(&format!("/api/v1/ideas/{id}/delete")).insert_header(bearer(&ada)).to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 204);
    assert!(!media.path().join(&social).exists());
    assert!(!media.path().join(&original).exists());
    let req = test::TestRequest::get().uri(&format!("/api/v1/ideas/{id}")).to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 404);
    let req = test::TestRequest::get().uri("/api/v1/ideas/search?q=solar").to_request();
    let found = json_body(test::call_service(&app, req).await).await;
    assert_eq!(found["page"]["count"], 1);
}

#[actix_web::test]
#[serial]
async fn invalid_submissions_write_nothing() {
    setup_env();
    let media = tempfile::tempdir().unwrap();
    let st = state(media.path(), 24);
    let app = test::init_service(App::new().app_data(web::Data::new(st.clone())).configure(config)).await;
    let ada = user_token(1, "ada");

    let cases = [
        (json!({ "title": { "en": " Leading space" }, "content": { "en": "x" } }), "__all__"),
        (json!({ "title": { "en": "A" }, "content": { "en": "x" } }), "__all__"),
        (json!({ "title": { "en": "Fine" } }), "content_en"),
        (json!({ "title": { "fr": "Seulement" }, "content": { "en": "x" } }), "title_en"),
        (json!({ "title": { "en": "Fine" }, "content": { "en": "x" }, "rating": 9 }), "rating"),
        (json!({ "title": { "en": "Fine" }, "content": { "en": "x" }, "categories": [12345] }), "categories"),
        (
            json!({ "title": { "en": "Fine" }, "content": { "en": "x" },
                    "translations": [{ "language": "ja", "title": "t", "content": "c" }] }),
            "translations-0-language",
        ),
        (
            json!({ "title": { "en": "Fine" }, "content": { "en": "x" },
                    "translations": [{ "language": "fr", "title": "a", "content": "c" },
                                     { "language": "fr", "title": "b", "content": "c" }] }),
            "translations",
        ),
    ];
    for (form, field) in cases {
        let resp = test::call_service(&app, post_idea("/api/v1/ideas/new", &ada, &form, None).to_request()).await;
        assert_eq!(resp.status(), 400, "{form}");
        let err = json_body(resp).await;
        assert!(err["fields"][field].is_array(), "expected error on {field}, got {err}");
    }

    // a text file is not a picture
    let form = json!({ "title": { "en": "Fine" }, "content": { "en": "x" } });
    let resp = test::call_service(
        &app,
        post_idea("/api/v1/ideas/new", &ada, &form, Some(("notes.png", b"hello world"))).to_request(),
    )
    .await;
    assert_eq!(resp.status(), 400);
    assert!(json_body(resp).await["fields"]["picture"].is_array());

    // missing form part
    let req = test::TestRequest::post()
        .uri("/api/v1/ideas/new")
        .insert_header(bearer(&ada))
        .insert_header(("Content-Type", "multipart/form-data; boundary=XBOUNDARYX"))
        .set_payload("--XBOUNDARYX--\r\n")
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 400);

    assert!(st.repo.all_ideas().await.unwrap().is_empty());
    assert!(std::fs::read_dir(media.path()).unwrap().next().is_none());
}

#[actix_web::test]
#[serial]
async fn unknown_ids_and_paths_are_not_found() {
    setup_env();
    let media = tempfile::tempdir().unwrap();
    let app = test::init_service(App::new().app_data(web::Data::new(state(media.path(), 24))).configure(config)).await;
    let ada = user_token(1, "ada");
    let missing = uuid::Uuid::new_v4();

    for uri in [
        format!("/api/v1/ideas/{missing}"),
        format!("/api/v1/ideas/{missing}/handout.pdf"),
        "/api/v1/ideas/not-a-uuid".to_string(),
        "/media/ideas/2024/01/nothing.png".to_string(),
        "/media/..%2F..%2Fetc%2Fpasswd".to_string(),
    ] {
        let req = test::TestRequest::get().uri(&uri).to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 404, "{uri}");
    }
    for uri in [format!("/api/v1/ideas/{missing}/edit"), format!("/api/v1/ideas/{missing}/delete")] {
        let req = test::TestRequest::get().uri(&uri).insert_header(bearer(&ada)).to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 404, "{uri}");
    }
    let req = test::TestRequest::post().uri(&format!("/api/v1/ideas/{missing}/like")).insert_header(bearer(&ada)).to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 404);
    let req = test::TestRequest::get().uri(&format!("/api/v1/ideas/{missing}/edit")).to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 401);
}

#[actix_web::test]
#[serial]
async fn listing_facets_and_pagination() {
    setup_env();
    let media = tempfile::tempdir().unwrap();
    let st = state(media.path(), 2);
    let energy = st.repo.create_category(NewCategory { title: Multilingual::new().with("en", "Energy") }).await.unwrap();
    let water = st.repo.create_category(NewCategory { title: Multilingual::new().with("en", "Water") }).await.unwrap();
    let app = test::init_service(App::new().app_data(web::Data::new(st.clone())).configure(config)).await;
    let ada = user_token(1, "ada");
    let bob = user_token(2, "bob");

    let ideas = [
        (&ada, "Alpha", vec![energy.id, water.id], Some(4)),
        (&ada, "Bravo", vec![water.id], Some(4)),
        (&bob, "Charlie", vec![energy.id], None),
        (&bob, "Delta", vec![energy.id, water.id], Some(2)),
        (&ada, "Echo", vec![], Some(4)),
    ];
    for (token, title, categories, rating) in ideas {
        let form = json!({ "title": { "en": title }, "content": { "en": "text" }, "categories": categories, "rating": rating });
        let resp = test::call_service(&app, post_idea("/api/v1/ideas/new", token, &form, None).to_request()).await;
        assert_eq!(resp.status(), 201);
    }

    let get = |uri: String| test::TestRequest::get().uri(&uri).to_request();
    let titles = |v: &Value| {
        v["items"].as_array().unwrap().iter().map(|i| i["title"].as_str().unwrap().to_string()).collect::<Vec<_>>()
    };

    let v = json_body(test::call_service(&app, get("/api/v1/ideas".into())).await).await;
    assert_eq!(titles(&v), vec!["Alpha", "Bravo"]);
    assert_eq!((v["page"]["count"].as_u64(), v["page"]["num_pages"].as_u64()), (Some(5), Some(3)));
    assert_eq!(v["facets"]["categories"]["authors"].as_array().unwrap().len(), 2);
    assert_eq!(v["facets"]["categories"]["ratings"].as_array().unwrap().len(), 5);
    assert!(v["facets"]["selected"]["category"].is_null());

    for (page, expected) in [("0", 1), ("abc", 1), ("-3", 1), ("2", 2), ("99", 3)] {
        let v = json_body(test::call_service(&app, get(format!("/api/v1/ideas?page={page}"))).await).await;
        assert_eq!(v["page"]["number"], expected, "page={page}");
    }
    let v = json_body(test::call_service(&app, get("/api/v1/ideas?page=99".into())).await).await;
    assert_eq!(titles(&v), vec!["Echo"]);

    // many-to-many filter without duplicates, combined with rating
    let v = json_body(test::call_service(&app, get(format!("/api/v1/ideas?category={}&rating=4", water.id))).await).await;
    assert_eq!(titles(&v), vec!["Alpha", "Bravo"]);
    assert_eq!(v["page"]["count"], 2);
    assert_eq!(v["facets"]["selected"]["rating"], json!({ "value": 4, "label": "★★★★☆" }));
    assert_eq!(v["facets"]["selected"]["category"]["title"], "Water");

    // author facet
    let v = json_body(test::call_service(&app, get("/api/v1/ideas?author=2".into())).await).await;
    assert_eq!(titles(&v), vec!["Charlie", "Delta"]);
    assert_eq!(v["facets"]["selected"]["author"]["username"], "bob");

    // invalid parameters are ignored, not reported
    let v = json_body(test::call_service(&app, get("/api/v1/ideas?author=x&category=999&rating=9".into())).await).await;
    assert_eq!(v["page"]["count"], 5);
    assert_eq!(v["facets"]["selected"], json!({ "author": null, "category": null, "rating": null }));

    // search with no query matches everything and paginates the same way
    let v = json_body(test::call_service(&app, get("/api/v1/ideas/search?q=&page=3".into())).await).await;
    assert_eq!(v["page"]["count"], 5);
    assert_eq!(v["page"]["number"], 3);
    assert_eq!(v["items"].as_array().unwrap().len(), 1);
}

fn media_file(media: &std::path::Path, url: &Value) -> std::path::PathBuf {
    media.join(url.as_str().unwrap().trim_start_matches("/media/"))
}

#[actix_web::test]
#[serial]
async fn delete_succeeds_when_picture_files_are_already_gone() {
    setup_env();
    let media = tempfile::tempdir().unwrap();
    let st = state(media.path(), 24);
    let app = test::init_service(App::new().app_data(web::Data::new(st.clone())).configure(config)).await;
    let ada = user_token(1, "ada");
    let png = sample_png();

    let mut ids = Vec::new();
    for title in ["Partly gone", "All gone"] {
        let form = json!({ "title": { "en": title }, "content": { "en": "text" } });
        let resp = test::call_service(&app, post_idea("/api/v1/ideas/new", &ada, &form, Some(("p.png", &png))).to_request()).await;
        assert_eq!(resp.status(), 201);
        ids.push(json_body(resp).await);
    }

    // one variant missing
    std::fs::remove_file(media_file(media.path(), &ids[0]["picture"]["social"])).unwrap();
    // every file missing
    for key in ["original", "social", "large", "thumbnail"] {
        std::fs::remove_file(media_file(media.path(), &ids[1]["picture"][key])).unwrap();
    }

    for created in &ids {
        let id = created["id"].as_str().unwrap();
        let req = test::TestRequest::post().uri(&format!("/api/v1/ideas/{id}/delete")).insert_header(bearer(&ada)).to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 204);
        assert!(st.repo.get_idea(id.parse().unwrap()).await.is_err());
        for key in ["original", "social", "large", "thumbnail"] {
            assert!(!media_file(media.path(), &created["picture"][key]).exists());
        }
    }
}

#[actix_web::test]
#[serial]
async fn replacing_a_picture_writes_new_files_and_removes_old_ones() {
    setup_env();
    let media = tempfile::tempdir().unwrap();
    let st = state(media.path(), 24);
    let app = test::init_service(App::new().app_data(web::Data::new(st.clone())).configure(config)).await;
    let ada = user_token(1, "ada");
    let png = sample_png();

    let form = json!({ "title": { "en": "Murals" }, "content": { "en": "Paint walls" } });
    let resp = test::call_service(&app, post_idea("/api/v1/ideas/new", &ada, &form, Some(("a.png", &png))).to_request()).await;
    let created = json_body(resp).await;
    let id = created["id"].as_str().unwrap().to_string();

    // same month, same extension
    let resp = test::call_service(
        &app,
        post_idea(&format!("/api/v1/ideas/{id}/edit"), &ada, &form, Some(("b.png", &png))).to_request(),
    )
    .await;
    assert_eq!(resp.status(), 200);
    let updated = json_body(resp).await;
    assert_ne!(updated["picture"]["original"], created["picture"]["original"]);
    for key in ["original", "social", "large", "thumbnail"] {
        assert!(media_file(media.path(), &updated["picture"][key]).exists(), "new {key} missing");
        assert!(!media_file(media.path(), &created["picture"][key]).exists(), "old {key} left behind");
    }
    let stored = st.repo.get_idea(id.parse().unwrap()).await.unwrap().picture.unwrap();
    assert_eq!(format!("/media/{stored}"), updated["picture"]["original"].as_str().unwrap());
}
