//! Integration tests for HttpUpstreamClient using wiremock
//!
//! These tests validate payload normalization, batching, retry and the public
//! listings token lifecycle against mock servers.

use regsync::config::{PipelineConfig, UpstreamConfig};
use regsync::models::{GradingCategory, Term};
use regsync::upstream::{CourseQuery, HttpUpstreamClient, UpstreamClient};
use regsync::utils::error::FetchError;
use serde_json::json;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(server: &MockServer, seat_batch_size: usize) -> HttpUpstreamClient {
    let upstream = UpstreamConfig {
        base_url: server.uri(),
        reg_listings_page_url: format!("{}/course-offerings", server.uri()),
        reg_listings_api_url: format!("{}/listings", server.uri()),
        rate_limit: 1000,
        max_retries: 2,
        retry_base_delay_ms: 1,
        ..UpstreamConfig::default()
    };
    let pipeline = PipelineConfig {
        seat_batch_size,
        ..PipelineConfig::default()
    };
    HttpUpstreamClient::new(&upstream, &pipeline, "secret").unwrap()
}

fn term() -> Term {
    "1252".parse().unwrap()
}

/// Terms come back most recent first regardless of upstream order
#[tokio::test]
async fn test_terms_sorted_descending_with_bearer() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/courses/terms"))
        .and(query_param("fmt", "json"))
        .and(header("authorization", "Bearer secret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "term": [
                {"code": "1244", "name": "Spring 2024"},
                {"code": 1252, "name": "Spring 2025", "start_date": "2025-01-27"},
                {"code": "spring", "name": "Broken"}
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let terms = client(&server, 300).get_terms().await.unwrap();
    let codes: Vec<u16> = terms.iter().map(|t| t.term.code()).collect();
    assert_eq!(codes, vec![1252, 1244]);
    assert_eq!(terms[0].start_date.as_deref(), Some("2025-01-27"));
}

/// Single objects where lists are expected are normalized to lists
#[tokio::test]
async fn test_courses_single_objects_become_lists() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/courses/courses"))
        .and(query_param("term", "1252"))
        .and(query_param("subject", "COS"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "term": {
                "subjects": {
                    "code": "COS",
                    "courses": {
                        "course_id": "002051",
                        "catalog_number": "126",
                        "title": "Computer Science",
                        "instructors": {
                            "emplid": "0001",
                            "first_name": "Robert",
                            "last_name": "Sedgewick",
                            "full_name": "Robert Sedgewick"
                        },
                        "classes": {
                            "class_number": 40001,
                            "section": "L01",
                            "status": "Open",
                            "capacity": "120",
                            "enrollment": "",
                            "schedule": {
                                "meetings": {
                                    "start_time": "11:00 AM",
                                    "end_time": "12:20 PM",
                                    "days": ["T", "Th"],
                                    "building": {"name": "Friend Center"},
                                    "room": "101"
                                }
                            }
                        }
                    }
                }
            }
        })))
        .mount(&server)
        .await;

    let subjects = client(&server, 300)
        .get_courses(&CourseQuery::for_term(term()).subject("COS"))
        .await
        .unwrap();

    assert_eq!(subjects.len(), 1);
    let course = &subjects[0].courses[0];
    assert_eq!(course.listing_id, "002051");
    assert_eq!(course.instructors.len(), 1);
    assert_eq!(course.instructors[0].full_name, "Robert Sedgewick");

    let class = &course.classes[0];
    assert_eq!(class.class_number, "40001");
    assert_eq!(class.capacity, 120);
    assert_eq!(class.enrollment, 0);
    assert_eq!(class.meetings.len(), 1);
    assert_eq!(class.meetings[0].days, vec!["T", "Th"]);
    assert_eq!(class.meetings[0].building.as_deref(), Some("Friend Center"));
}

#[tokio::test]
async fn test_course_details_grading_and_instructors() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/courses/details"))
        .and(query_param("course_id", "002051"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "course_details": {
                "course_detail": {
                    "distribution_area_short": "QCR",
                    "grading_basis": "FUL",
                    "grading_final_exam": "40",
                    "grading_prob_sets": 60,
                    "grading_quizzes": "0",
                    "course_head_netid": "kwayne",
                    "course_head_name": "Kevin Wayne",
                    "course_instructors": {
                        "course_instructor": {"netid": "rs", "name": "Robert Sedgewick"}
                    }
                }
            }
        })))
        .mount(&server)
        .await;

    let details = client(&server, 300)
        .get_course_details("002051", term())
        .await
        .unwrap();

    assert_eq!(details.dists, vec!["QCR"]);
    assert_eq!(details.has_final, Some(true));
    assert_eq!(details.grading.len(), 2);
    assert_eq!(details.grading.get(&GradingCategory::ProblemSets), Some(&60));
    assert_eq!(details.instructors.len(), 1);
    assert_eq!(details.course_head.as_ref().map(|h| h.netid.as_str()), Some("kwayne"));
}

#[tokio::test]
async fn test_empty_details_envelope_is_decode_error() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/courses/details"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"course_details": {}})))
        .mount(&server)
        .await;

    let result = client(&server, 300).get_course_details("002051", term()).await;
    assert!(matches!(result, Err(FetchError::Decode(_))));
}

/// Seat ids are split into batches of the configured size
#[tokio::test]
async fn test_seats_batched() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/courses/seats"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "course": {
                "course_id": "002051",
                "classes": {"class_number": "40001", "capacity": 120, "enrollment": "99", "pu_calc_status": "Open"}
            }
        })))
        .expect(3)
        .mount(&server)
        .await;

    let ids: Vec<String> = (1..=5).map(|i| format!("00200{i}")).collect();
    let fetch = client(&server, 2).get_seats(term(), &ids).await.unwrap();

    assert_eq!(fetch.seats.len(), 3);
    assert!(fetch.failed.is_empty());
    assert_eq!(fetch.seats[0].classes[0].enrollment, 99);
    assert_eq!(fetch.seats[0].classes[0].status.as_deref(), Some("Open"));
}

/// A batch that keeps failing does not discard the batches that succeeded
#[tokio::test]
async fn test_failed_seat_batch_reported_separately() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/courses/seats"))
        .and(query_param("course_ids", "002051"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "course": {"course_id": "002051", "classes": []}
        })))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/courses/seats"))
        .and(query_param("course_ids", "002052"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&server)
        .await;

    let ids = vec!["002051".to_string(), "002052".to_string()];
    let fetch = client(&server, 1).get_seats(term(), &ids).await.unwrap();

    assert_eq!(fetch.seats.len(), 1);
    assert_eq!(fetch.seats[0].course_id, "002051");
    assert_eq!(fetch.failed, vec!["002052"]);
}

#[tokio::test]
async fn test_rejected_token_fails_seat_fetch() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/courses/seats"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    let ids = vec!["002051".to_string(), "002052".to_string()];
    let result = client(&server, 1).get_seats(term(), &ids).await;
    assert!(matches!(result, Err(FetchError::Unauthorized(401))));
}

/// Test that server errors trigger retries
#[tokio::test]
async fn test_server_error_retry() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/courses/terms"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/courses/terms"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"term": []})))
        .mount(&server)
        .await;

    let terms = client(&server, 300).get_terms().await;
    assert!(terms.is_ok(), "Should succeed after retries: {:?}", terms.err());
}

#[tokio::test]
async fn test_retries_exhausted() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/courses/terms"))
        .respond_with(ResponseTemplate::new(500))
        .expect(3)
        .mount(&server)
        .await;

    let result = client(&server, 300).get_terms().await;
    assert!(matches!(result, Err(FetchError::MaxRetriesExceeded(_))));
}

/// Test 401 does not retry
#[tokio::test]
async fn test_unauthorized_not_retried() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/courses/terms"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    let result = client(&server, 300).get_terms().await;
    assert!(matches!(result, Err(FetchError::Unauthorized(401))));
}

/// The scraped token is reused while fresh
#[tokio::test]
async fn test_reg_listings_with_scraped_token() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/course-offerings"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"<html><script>var settings = {"apiToken":"tok1","env":"prod"};</script></html>"#,
        ))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/listings/classes/1252"))
        .and(header("authorization", "Bearer tok1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "classes": {
                "class": {
                    "course_id": "002051",
                    "subject": "cos",
                    "catnum": "126",
                    "distribution_area": "QCR"
                }
            }
        })))
        .expect(2)
        .mount(&server)
        .await;

    let client = client(&server, 300);
    let listings = client.get_reg_listings(term()).await.unwrap();
    assert_eq!(listings.len(), 1);
    assert_eq!(listings[0].subject, "COS");
    assert_eq!(listings[0].dists, vec!["QCR"]);

    client.get_reg_listings(term()).await.unwrap();
}

/// A rejected token is re-scraped once and the request retried
#[tokio::test]
async fn test_reg_listings_token_refresh() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/course-offerings"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"apiToken":"stale"}"#))
        .up_to_n_times(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/course-offerings"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"apiToken":"fresh"}"#))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/listings/classes/1252"))
        .and(header("authorization", "Bearer stale"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/listings/classes/1252"))
        .and(header("authorization", "Bearer fresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"classes": {"class": []}})))
        .expect(1)
        .mount(&server)
        .await;

    let listings = client(&server, 300).get_reg_listings(term()).await.unwrap();
    assert!(listings.is_empty());
}

#[tokio::test]
async fn test_missing_token_on_listings_page() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/course-offerings"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html></html>"))
        .mount(&server)
        .await;

    let result = client(&server, 300).get_reg_listings(term()).await;
    assert!(matches!(result, Err(FetchError::TokenNotFound)));
}
