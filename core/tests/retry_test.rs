use parley_core::{ParleyError, RetryPolicy};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

#[tokio::test(start_paused = true)]
async fn rate_limit_retried_three_times_then_reraised() {
    let policy = RetryPolicy::default();
    let attempts: Arc<Mutex<Vec<Instant>>> = Arc::new(Mutex::new(Vec::new()));

    let seen = Arc::clone(&attempts);
    let result: Result<(), ParleyError> = policy
        .run("generate", || {
            let seen = Arc::clone(&seen);
            async move {
                seen.lock().unwrap().push(Instant::now());
                Err(ParleyError::RateLimited("429 original".into()))
            }
        })
        .await;

    match result {
        Err(ParleyError::RateLimited(msg)) => assert_eq!(msg, "429 original"),
        other => panic!("expected original rate-limit error, got {:?}", other),
    }

    let times = attempts.lock().unwrap().clone();
    assert_eq!(times.len(), 3);
    let gaps: Vec<Duration> = times.windows(2).map(|w| w[1] - w[0]).collect();
    assert!(gaps.windows(2).all(|g| g[1] >= g[0]), "gaps {:?}", gaps);
    assert!(gaps[0] >= Duration::from_secs(4));
    assert!(gaps[1] >= Duration::from_secs(8));
}

#[tokio::test(start_paused = true)]
async fn auth_error_is_not_retried() {
    let policy = RetryPolicy::default();
    let calls = Arc::new(Mutex::new(0u32));

    let counter = Arc::clone(&calls);
    let result: Result<(), ParleyError> = policy
        .run("generate", || {
            let counter = Arc::clone(&counter);
            async move {
                *counter.lock().unwrap() += 1;
                Err(ParleyError::Auth("401".into()))
            }
        })
        .await;

    assert!(matches!(result, Err(ParleyError::Auth(_))));
    assert_eq!(*calls.lock().unwrap(), 1);
}

#[tokio::test(start_paused = true)]
async fn transient_then_success() {
    let policy = RetryPolicy::default();
    let calls = Arc::new(Mutex::new(0u32));

    let counter = Arc::clone(&calls);
    let result = policy
        .run("generate", || {
            let counter = Arc::clone(&counter);
            async move {
                let mut n = counter.lock().unwrap();
                *n += 1;
                if *n == 1 {
                    Err(ParleyError::Timeout("slow".into()))
                } else {
                    Ok("answer")
                }
            }
        })
        .await
        .unwrap();

    assert_eq!(result, "answer");
    assert_eq!(*calls.lock().unwrap(), 2);
}

#[test]
fn classification() {
    assert!(ParleyError::RateLimited(String::new()).is_transient());
    assert!(ParleyError::Timeout(String::new()).is_transient());
    assert!(ParleyError::Transient(String::new()).is_transient());
    assert!(!ParleyError::Auth(String::new()).is_transient());
    assert!(!ParleyError::InvalidRequest(String::new()).is_transient());
    assert!(!ParleyError::NotInitialized.is_transient());
}

#[test]
fn status_mapping() {
    use reqwest::StatusCode;
    assert!(matches!(
        ParleyError::from_status(StatusCode::TOO_MANY_REQUESTS, String::new()),
        ParleyError::RateLimited(_)
    ));
    assert!(matches!(
        ParleyError::from_status(StatusCode::BAD_GATEWAY, String::new()),
        ParleyError::Transient(_)
    ));
    assert!(matches!(
        ParleyError::from_status(StatusCode::UNAUTHORIZED, String::new()),
        ParleyError::Auth(_)
    ));
    assert!(matches!(
        ParleyError::from_status(StatusCode::BAD_REQUEST, String::new()),
        ParleyError::InvalidRequest(_)
    ));
}
