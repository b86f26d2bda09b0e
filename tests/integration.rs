use quiz_funnel::{build_state, config::AppConfig, routes::build_router};
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::time::Duration;

async fn spawn_server() -> (String, reqwest::Client) {
    let config = AppConfig {
        local_state_path: None,
        transition_delay: Duration::from_millis(10),
        ..AppConfig::default()
    };
    let state = build_state(config).expect("state");
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let client = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap();
    (format!("http://{}", addr), client)
}

fn sample_quiz_payload(slug: &str) -> Value {
    json!({
        "title": "Marketing maturity",
        "slug": slug,
        "description": "Where does your team stand?",
        "questions": [
            {
                "id": "q1",
                "type": "multiple_choice",
                "text": "Do you run paid campaigns?",
                "options": [
                    {"value": "a", "label": "Every month", "score": 3},
                    {"value": "b", "label": "Rarely", "score": 1}
                ]
            },
            {
                "id": "q2",
                "type": "multiple_choice",
                "text": "Do you track conversions?",
                "options": [
                    {"value": "c", "label": "Yes", "score": 5},
                    {"value": "d", "label": "No", "score": 0}
                ]
            }
        ],
        "thankYouPages": [
            {"title": "Low", "scoreRangeMin": 0, "scoreRangeMax": 2},
            {"title": "High", "scoreRangeMin": 3, "scoreRangeMax": 10}
        ]
    })
}

async fn create_quiz(base: &str, client: &reqwest::Client, payload: Value) -> Value {
    let resp = client
        .post(format!("{}/api/v1/quizzes", base))
        .json(&payload)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    resp.json().await.unwrap()
}

async fn post(client: &reqwest::Client, url: String, body: Value) -> (StatusCode, Value) {
    let resp = client.post(url).json(&body).send().await.unwrap();
    let status = resp.status();
    let body = resp.json().await.unwrap_or(Value::Null);
    (status, body)
}

#[tokio::test]
async fn quiz_crud_and_public_fetch() {
    let (base, client) = spawn_server().await;
    let quiz = create_quiz(&base, &client, sample_quiz_payload("growth")).await;
    let id = quiz["id"].as_str().unwrap().to_string();
    assert_eq!(quiz["questions"][1]["order"], 1);

    let dup = client
        .post(format!("{}/api/v1/quizzes", base))
        .json(&sample_quiz_payload("growth"))
        .send()
        .await
        .unwrap();
    assert_eq!(dup.status(), StatusCode::CONFLICT);

    let list: Value = client
        .get(format!("{}/api/v1/quizzes", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(list["total"], 1);

    let public = client
        .get(format!("{}/api/v1/public/quizzes/growth", base))
        .send()
        .await
        .unwrap();
    assert_eq!(public.status(), StatusCode::OK);

    let mut inactive = sample_quiz_payload("growth");
    inactive["isActive"] = json!(false);
    let resp = client
        .put(format!("{}/api/v1/quizzes/{}", base, id))
        .json(&inactive)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let public = client
        .get(format!("{}/api/v1/public/quizzes/growth", base))
        .send()
        .await
        .unwrap();
    assert_eq!(public.status(), StatusCode::NOT_FOUND);

    let resp = client
        .delete(format!("{}/api/v1/quizzes/{}", base, id))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    let resp = client
        .get(format!("{}/api/v1/quizzes/{}", base, id))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn invalid_quiz_reports_details() {
    let (base, client) = spawn_server().await;
    let mut payload = sample_quiz_payload("broken");
    payload["thankYouPages"][0]["scoreRangeMin"] = json!(50);
    let (status, body) = post(&client, format!("{}/api/v1/quizzes", base), payload).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    assert_eq!(body["error"]["details"][0]["field"], "thankYouPages[0].scoreRangeMin");
}

#[tokio::test]
async fn hosted_session_runs_to_results() {
    let (base, client) = spawn_server().await;
    let quiz = create_quiz(&base, &client, sample_quiz_payload("hosted")).await;
    let quiz_id = quiz["id"].as_str().unwrap().to_string();

    let resp = client
        .post(format!("{}/api/v1/public/quizzes/hosted/sessions", base))
        .header("user-agent", "IntegrationTest/1.0")
        .json(&json!({"url": "/quiz/hosted?utm_source=newsletter&ref=partner"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let view: Value = resp.json().await.unwrap();
    let sid = view["sessionId"].as_str().unwrap().to_string();
    assert_eq!(view["step"], "question");
    assert_eq!(view["question"]["id"], "q1");

    let (status, view) = post(&client, format!("{}/api/v1/sessions/{}/select", base, sid), json!({"questionId": "q1", "value": "a"})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(view["index"], 1);

    let (status, body) = post(&client, format!("{}/api/v1/sessions/{}/back", base, sid), json!({"questionId": "q2"})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "INVALID_INPUT");

    let (_, view) = post(&client, format!("{}/api/v1/sessions/{}/select", base, sid), json!({"questionId": "q2", "value": "d"})).await;
    assert_eq!(view["step"], "lead_capture");

    let (status, body) = post(
        &client,
        format!("{}/api/v1/sessions/{}/lead", base, sid),
        json!({"form": {"email": "not-an-email"}}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["details"][0]["field"], "email");

    let (status, view) = post(
        &client,
        format!("{}/api/v1/sessions/{}/lead", base, sid),
        json!({"form": {"firstName": "Jane", "email": "jane@acme.io"}}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(view["step"], "results");
    assert_eq!(view["result"]["score"], 3);
    assert_eq!(view["result"]["outcome"], "High");

    let leads: Value = client
        .get(format!("{}/api/v1/quizzes/{}/leads", base, quiz_id))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(leads["total"], 1);
    let lead = &leads["items"][0];
    assert_eq!(lead["email"], "jane@acme.io");
    assert_eq!(lead["outcome"], "High");
    assert_eq!(lead["hiddenData"]["utm_source"], "newsletter");
    assert_eq!(lead["hiddenData"]["ref"], "partner");
    assert_eq!(lead["hiddenData"]["userAgent"], "IntegrationTest/1.0");

    let funnel: Value = client
        .get(format!("{}/api/v1/quizzes/{}/funnel", base, quiz_id))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(funnel, json!([
        {"step": "view", "sessions": 1},
        {"step": "start", "sessions": 1},
        {"step": "complete", "sessions": 1}
    ]));

    let stats: Value = client
        .get(format!("{}/api/v1/quizzes/{}/stats", base, quiz_id))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stats["totalResponses"], 1);

    let resp = client
        .get(format!("{}/api/v1/sessions/{}", base, sid))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn double_click_does_not_answer_the_next_question() {
    let (base, client) = spawn_server().await;
    let yes_no = |id: &str| {
        json!({
            "id": id,
            "type": "yes_no",
            "text": "Ready?",
            "options": [{"value": "yes", "label": "Yes"}, {"value": "no", "label": "No"}]
        })
    };
    create_quiz(
        &base,
        &client,
        json!({"title": "Twice", "slug": "twice", "questions": [yes_no("q1"), yes_no("q2")]}),
    )
    .await;
    let (_, view) = post(&client, format!("{}/api/v1/public/quizzes/twice/sessions", base), json!({})).await;
    let sid = view["sessionId"].as_str().unwrap().to_string();

    let url = format!("{}/api/v1/sessions/{}/select", base, sid);
    let click = json!({"questionId": "q1", "value": "yes"});
    let (first, second) = tokio::join!(
        post(&client, url.clone(), click.clone()),
        post(&client, url, click)
    );
    let mut statuses = vec![first.0, second.0];
    statuses.sort();
    assert_eq!(statuses, vec![StatusCode::OK, StatusCode::CONFLICT]);

    let view: Value = client
        .get(format!("{}/api/v1/sessions/{}", base, sid))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(view["step"], "question");
    assert_eq!(view["question"]["id"], "q2");
    assert_eq!(view["index"], 1);
}

#[tokio::test]
async fn quiz_without_questions_is_not_ready() {
    let (base, client) = spawn_server().await;
    create_quiz(&base, &client, json!({"title": "Empty", "slug": "empty", "questions": []})).await;
    let (status, body) = post(&client, format!("{}/api/v1/public/quizzes/empty/sessions", base), json!({})).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "QUIZ_NOT_READY");
}

#[tokio::test]
async fn responses_endpoint_deduplicates_leads() {
    let (base, client) = spawn_server().await;
    let quiz = create_quiz(&base, &client, sample_quiz_payload("dedup")).await;
    let quiz_id = quiz["id"].as_str().unwrap().to_string();

    let submission = |email: &str, score: i64| {
        json!({
            "quizId": quiz_id,
            "answers": {"q1": "a", "q2": "c"},
            "timeTaken": 20,
            "lead": {"email": email, "score": score, "outcome": "High"}
        })
    };
    let (status, first) = post(&client, format!("{}/api/v1/responses", base), submission("sam@acme.io", 8)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["success"], true);
    let (_, second) = post(&client, format!("{}/api/v1/responses", base), submission("Sam@Acme.io", 8)).await;
    assert_eq!(first["leadId"], second["leadId"]);
    post(&client, format!("{}/api/v1/responses", base), submission("kim@acme.io", 14)).await;

    let responses: Value = client
        .get(format!("{}/api/v1/quizzes/{}/responses", base, quiz_id))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(responses["total"], 3);

    let distribution: Value = client
        .get(format!("{}/api/v1/quizzes/{}/score-distribution", base, quiz_id))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(distribution, json!([
        {"range": "0-9", "bucketStart": 0, "count": 1},
        {"range": "10-19", "bucketStart": 10, "count": 1}
    ]));

    let stats: Value = client
        .get(format!("{}/api/v1/stats", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stats["totalLeads"], 2);
    assert_eq!(stats["totalResponses"], 3);
    assert_eq!(stats["avgTimeTaken"], 20);

    let (status, _) = post(
        &client,
        format!("{}/api/v1/responses", base),
        json!({"quizId": "00000000-0000-0000-0000-000000000000", "answers": {}}),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn ab_test_redirects_to_variant() {
    let (base, client) = spawn_server().await;
    let a = create_quiz(&base, &client, sample_quiz_payload("variant-a")).await;
    let b = create_quiz(&base, &client, sample_quiz_payload("variant-b")).await;

    let (status, body) = post(
        &client,
        format!("{}/api/v1/ab-tests", base),
        json!({
            "name": "Headline",
            "slug": "headline",
            "status": "active",
            "variants": [
                {"quizId": a["id"], "trafficPercentage": 60},
                {"quizId": b["id"], "trafficPercentage": 30}
            ]
        }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");

    let (status, test) = post(
        &client,
        format!("{}/api/v1/ab-tests", base),
        json!({
            "name": "Headline",
            "slug": "headline",
            "status": "active",
            "variants": [
                {"quizId": a["id"], "trafficPercentage": 100},
                {"quizId": b["id"], "trafficPercentage": 0}
            ]
        }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let variant_id = test["variants"][0]["id"].as_str().unwrap();

    let resp = client.get(format!("{}/ab/headline", base)).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::TEMPORARY_REDIRECT);
    let location = resp.headers()["location"].to_str().unwrap().to_string();
    assert_eq!(
        location,
        format!("/quiz/variant-a?utm_source=ab_test&utm_campaign=headline&utm_content={}", variant_id)
    );

    let test_id = test["id"].as_str().unwrap();
    let resp = client
        .put(format!("{}/api/v1/ab-tests/{}", base, test_id))
        .json(&json!({"name": "Headline", "slug": "headline", "status": "stopped", "variants": []}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let resp = client.get(format!("{}/ab/headline", base)).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn integrations_are_scoped_to_their_quiz() {
    let (base, client) = spawn_server().await;
    let quiz = create_quiz(&base, &client, sample_quiz_payload("integrated")).await;
    let quiz_id = quiz["id"].as_str().unwrap();

    let (status, integration) = post(
        &client,
        format!("{}/api/v1/quizzes/{}/integrations", base, quiz_id),
        json!({"type": "facebook_pixel", "config": {"pixelId": "123", "accessToken": "token"}}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(integration["type"], "facebook_pixel");
    assert_eq!(integration["isActive"], true);

    let list: Value = client
        .get(format!("{}/api/v1/quizzes/{}/integrations", base, quiz_id))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(list["total"], 1);

    let integration_id = integration["id"].as_str().unwrap();
    let resp = client
        .delete(format!("{}/api/v1/quizzes/{}/integrations/{}", base, quiz_id, integration_id))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn interactions_endpoint_feeds_the_funnel() {
    let (base, client) = spawn_server().await;
    let quiz = create_quiz(&base, &client, sample_quiz_payload("tracked")).await;
    let quiz_id = quiz["id"].as_str().unwrap();

    for (session, kind) in [("s1", "view"), ("s2", "view"), ("s1", "start")] {
        let resp = client
            .post(format!("{}/api/v1/interactions", base))
            .json(&json!({"quizId": quiz_id, "sessionId": session, "type": kind}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
    }

    let funnel: Value = client
        .get(format!("{}/api/v1/quizzes/{}/funnel", base, quiz_id))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(funnel[0]["sessions"], 2);
    assert_eq!(funnel[1]["sessions"], 1);
    assert_eq!(funnel[2]["sessions"], 0);
}
