use reqwest::StatusCode;
use serde_json::{Value, json};
use sth::{SthConfig, SthServer};

async fn start_server() -> String {
    let mut config = SthConfig::default();
    config.host = "127.0.0.1".to_string();
    config.port = 0;
    config.kpi_interval_secs = 0;
    let server = SthServer::bind(config).await.unwrap();
    let addr = server.local_addr().unwrap();
    tokio::spawn(server.serve());
    format!("http://{addr}")
}

fn notification(attr_name: &str, attr_type: &str, value: Value, time_instant: &str) -> Value {
    json!({
        "subscriptionId": "51c0ac9ed714fb3b37d7d5a8",
        "contextResponses": [{
            "contextElement": {
                "id": "Room1",
                "type": "Room",
                "attributes": [{
                    "name": attr_name,
                    "type": attr_type,
                    "value": value,
                    "metadatas": [{
                        "name": "TimeInstant",
                        "type": "ISO8601",
                        "value": time_instant
                    }]
                }]
            }
        }]
    })
}

async fn notify(client: &reqwest::Client, base: &str, body: &Value) {
    let response = client
        .post(format!("{base}/notify"))
        .header("fiware-service", "smartcity")
        .header("fiware-servicepath", "/gardens")
        .json(body)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

fn historic_url(base: &str) -> String {
    format!("{base}/STH/v1/contextEntities/type/Room/id/Room1/attributes/temperature")
}

#[tokio::test]
async fn last_n_returns_the_most_recent_event() {
    let base = start_server().await;
    let client = reqwest::Client::new();

    for i in 1..=5 {
        let body = notification(
            "temperature",
            "float",
            json!(format!("{}.0", 20 + i)),
            &format!("2020-03-15T10:11:0{i}Z"),
        );
        notify(&client, &base, &body).await;
    }

    let response = client
        .get(historic_url(&base))
        .header("fiware-service", "smartcity")
        .header("fiware-servicepath", "/gardens")
        .query(&[("lastN", "1")])
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body: Value = response.json().await.unwrap();
    let values = body["contextResponses"][0]["contextElement"]["attributes"][0]["values"]
        .as_array()
        .unwrap();
    assert_eq!(values.len(), 1);
    assert_eq!(values[0]["attrValue"], 25.0);
    assert_eq!(values[0]["recvTime"], "2020-03-15T10:11:05Z");
}

#[tokio::test]
async fn window_pages_through_events() {
    let base = start_server().await;
    let client = reqwest::Client::new();

    for i in 0..5 {
        let body = notification(
            "temperature",
            "float",
            json!(i),
            &format!("2020-03-15T10:11:0{i}Z"),
        );
        notify(&client, &base, &body).await;
    }

    let response = client
        .get(historic_url(&base))
        .header("fiware-service", "smartcity")
        .header("fiware-servicepath", "/gardens")
        .query(&[("hLimit", "2"), ("hOffset", "1")])
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body: Value = response.json().await.unwrap();
    let values = body["contextResponses"][0]["contextElement"]["attributes"][0]["values"]
        .as_array()
        .unwrap();
    assert_eq!(values.len(), 2);
    assert_eq!(values[0]["attrValue"], 1.0);
    assert_eq!(values[1]["attrValue"], 2.0);
}

#[tokio::test]
async fn aggregated_sum_over_one_minute() {
    let base = start_server().await;
    let client = reqwest::Client::new();

    for (i, value) in [10, 20, 30].iter().enumerate() {
        let body = notification(
            "temperature",
            "float",
            json!(value),
            &format!("2020-03-15T10:11:2{i}Z"),
        );
        notify(&client, &base, &body).await;
    }

    let response = client
        .get(historic_url(&base))
        .header("fiware-service", "smartcity")
        .header("fiware-servicepath", "/gardens")
        .query(&[
            ("aggrMethod", "sum"),
            ("aggrPeriod", "minute"),
            ("dateFrom", "2020-03-15T10:00:00Z"),
            ("dateTo", "2020-03-15T11:00:00Z"),
        ])
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body: Value = response.json().await.unwrap();
    let values = body["contextResponses"][0]["contextElement"]["attributes"][0]["values"]
        .as_array()
        .unwrap();
    assert_eq!(values.len(), 1);
    assert_eq!(values[0]["origin"], "2020-03-15T10:00:00+00:00");
    assert_eq!(values[0]["resolution"], "minute");
    let points = values[0]["points"].as_array().unwrap();
    assert_eq!(points.len(), 1);
    assert_eq!(points[0]["offset"], 11);
    assert_eq!(points[0]["samples"], 3);
    assert_eq!(points[0]["sum"], 60.0);
}

#[tokio::test]
async fn occurrences_per_second_for_string_values() {
    let base = start_server().await;
    let client = reqwest::Client::new();

    for (i, value) in ["a", "b", "a"].iter().enumerate() {
        let body = notification(
            "status",
            "string",
            json!(value),
            &format!("2020-03-15T10:11:0{i}Z"),
        );
        notify(&client, &base, &body).await;
    }

    let response = client
        .get(format!(
            "{base}/STH/v1/contextEntities/type/Room/id/Room1/attributes/status"
        ))
        .header("fiware-service", "smartcity")
        .header("fiware-servicepath", "/gardens")
        .query(&[
            ("aggrMethod", "occur"),
            ("aggrPeriod", "second"),
            ("dateFrom", "2020-03-15T10:11:00Z"),
            ("dateTo", "2020-03-15T10:12:00Z"),
        ])
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body: Value = response.json().await.unwrap();
    let values = body["contextResponses"][0]["contextElement"]["attributes"][0]["values"]
        .as_array()
        .unwrap();
    assert_eq!(values.len(), 1);
    assert_eq!(values[0]["origin"], "2020-03-15T10:11:00+00:00");
    let points = values[0]["points"].as_array().unwrap();
    assert_eq!(points.len(), 3);
    assert_eq!(points[0]["offset"], 0);
    assert_eq!(points[0]["occur"], json!({"a": 1}));
    assert_eq!(points[1]["offset"], 1);
    assert_eq!(points[1]["occur"], json!({"b": 1}));
    assert_eq!(points[2]["offset"], 2);
    assert_eq!(points[2]["occur"], json!({"a": 1}));
}

#[tokio::test]
async fn numeric_method_on_string_attribute_is_rejected() {
    let base = start_server().await;
    let client = reqwest::Client::new();

    let body = notification("status", "string", json!("on"), "2020-03-15T10:11:00Z");
    notify(&client, &base, &body).await;

    let response = client
        .get(format!(
            "{base}/STH/v1/contextEntities/type/Room/id/Room1/attributes/status"
        ))
        .header("fiware-service", "smartcity")
        .header("fiware-servicepath", "/gardens")
        .query(&[
            ("aggrMethod", "sum"),
            ("aggrPeriod", "second"),
            ("dateFrom", "2020-03-15T10:00:00Z"),
            ("dateTo", "2020-03-15T11:00:00Z"),
        ])
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn no_recognised_parameters_is_a_validation_error() {
    let base = start_server().await;
    let client = reqwest::Client::new();

    let response = client
        .get(historic_url(&base))
        .header("fiware-service", "smartcity")
        .header("fiware-servicepath", "/gardens")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["validation"]["source"], "query");
    let keys = body["validation"]["keys"].as_array().unwrap();
    for expected in [
        "lastN",
        "hLimit",
        "hOffset",
        "filetype",
        "aggrMethod",
        "aggrPeriod",
    ] {
        assert!(keys.contains(&json!(expected)), "missing key {expected}");
    }
}

#[tokio::test]
async fn missing_service_header_is_a_validation_error() {
    let base = start_server().await;
    let client = reqwest::Client::new();

    let response = client
        .get(historic_url(&base))
        .header("fiware-servicepath", "/gardens")
        .query(&[("lastN", "1")])
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["validation"]["source"], "headers");
    assert_eq!(body["validation"]["keys"], json!(["fiware-service"]));
}

#[tokio::test]
async fn unknown_namespace_returns_the_empty_envelope() {
    let base = start_server().await;
    let client = reqwest::Client::new();

    let response = client
        .get(historic_url(&base))
        .header("fiware-service", "nowhere")
        .header("fiware-servicepath", "/nothing")
        .query(&[("lastN", "10")])
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body: Value = response.json().await.unwrap();
    let element = &body["contextResponses"][0]["contextElement"];
    assert_eq!(element["id"], "Room1");
    assert_eq!(element["isPattern"], false);
    assert_eq!(element["attributes"][0]["values"], json!([]));
    assert_eq!(body["contextResponses"][0]["statusCode"]["code"], "200");
}

#[tokio::test]
async fn csv_export_enumerates_the_events() {
    let base = start_server().await;
    let client = reqwest::Client::new();

    for i in 0..3 {
        let body = notification(
            "temperature",
            "float",
            json!(20 + i),
            &format!("2020-03-15T10:11:0{i}Z"),
        );
        notify(&client, &base, &body).await;
    }

    let response = client
        .get(historic_url(&base))
        .header("fiware-service", "smartcity")
        .header("fiware-servicepath", "/gardens")
        .query(&[("filetype", "csv")])
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["content-type"].to_str().unwrap(),
        "text/csv"
    );
    assert!(
        response.headers()["content-disposition"]
            .to_str()
            .unwrap()
            .contains("temperature.csv")
    );

    let content = response.text().await.unwrap();
    let mut lines = content.lines();
    assert_eq!(
        lines.next().unwrap(),
        "recvTime,entityId,entityType,attrName,attrType,attrValue"
    );
    assert_eq!(lines.clone().count(), 3);
    assert!(lines.any(|l| l.contains("Room1,Room,temperature,float,22")));
}

#[tokio::test]
async fn correlator_header_is_echoed() {
    let base = start_server().await;
    let client = reqwest::Client::new();

    let response = client
        .get(historic_url(&base))
        .header("fiware-service", "smartcity")
        .header("fiware-servicepath", "/gardens")
        .header("Unica-Correlator", "corr-1234")
        .query(&[("lastN", "1")])
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["Unica-Correlator"].to_str().unwrap(),
        "corr-1234"
    );
}

#[tokio::test]
async fn unknown_routes_are_not_found() {
    let base = start_server().await;
    let client = reqwest::Client::new();

    let response = client
        .get(format!("{base}/STH/v1/unknown"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // Wrong method on a known route.
    let response = client
        .delete(format!("{base}/notify"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn version_reports_the_crate_version() {
    let base = start_server().await;
    let client = reqwest::Client::new();

    let response = client
        .get(format!("{base}/version"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}
