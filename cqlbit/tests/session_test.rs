mod common;

use common::*;
use cqlbit::*;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

fn acme() -> SuffixValues {
    SuffixValues::from([("tenant".to_string(), Value::text("acme"))])
}

#[test]
fn it_should_write_an_object_to_every_table_in_one_batch() {
    let (driver, session) = create_test_session();
    session.execute(session.insert(&order(1)).unwrap()).expect("Failed to insert");

    let requests = driver.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].keyspace, "shop_acme");
    assert_eq!(requests[0].batch, Some(BatchKind::Logged));
    assert_eq!(requests[0].tables(), vec!["orders", "orders_by_status"]);
    assert_eq!(requests[0].options.fetch_size, Some(session.settings().execution.fetch_size));
}

#[test]
fn it_should_refuse_statements_with_unbound_keys() {
    let (driver, session) = create_test_session();
    let delete = session.delete_type::<Order>().unwrap().suffix("tenant", "acme").where_(eq("region", "us"));
    let err = session.execute(delete).unwrap_err();
    assert!(matches!(err, CqlError::MissingKeyClause { missing, .. } if missing == vec!["id".to_string()]));

    let unbound_tenant = session.select::<Order>().unwrap().where_(eq("region", "us")).and(eq("id", 1_i64));
    assert!(matches!(session.execute(unbound_tenant), Err(CqlError::MissingKeyClause { .. })));
    assert!(driver.requests().is_empty());
}

#[test]
fn it_should_stop_a_sequence_at_the_first_failure() {
    let (driver, session) = create_test_session();
    driver.respond_with(|request| {
        if binds_id(request, 2) {
            Err(DriverError::Unavailable("2 of 3 replicas down".into()))
        } else {
            Ok(RawResult::default())
        }
    });
    let sequence = session
        .sequence()
        .add(session.insert(&order(1)).unwrap())
        .add(session.insert(&order(2)).unwrap())
        .add(session.insert(&order(3)).unwrap());

    let err = session.execute(sequence).unwrap_err();
    assert!(matches!(err, CqlError::ExecutionFailure(DriverError::Unavailable(_))));
    let requests = driver.requests();
    assert_eq!(requests.len(), 2);
    assert!(!requests.iter().any(|r| binds_id(r, 3)));
}

#[test]
fn it_should_fail_a_sequence_whose_hop_panics() {
    let (driver, session) = create_test_session();
    driver.respond_with(|request| {
        if request.text().contains("DELETE") {
            panic!("driver bug");
        }
        Ok(RawResult::default())
    });
    let sequence = session.sequence().add(session.insert(&order(1)).unwrap()).add(session.delete(&order(1)).unwrap());

    let mut future = session.execute_async(sequence).unwrap();
    let err = future.get_timeout(Duration::from_secs(5)).unwrap_err();
    assert!(matches!(&err, CqlError::Custom(msg) if msg.contains("driver bug")), "unexpected outcome: {:?}", err);
    assert!(future.is_done());
    assert_eq!(driver.requests().len(), 2);

    let sequence = session.sequence().add(session.insert(&order(2)).unwrap()).add(session.delete(&order(2)).unwrap());
    assert!(matches!(session.execute(sequence), Err(CqlError::Custom(_))));
}

#[test]
fn it_should_expose_only_the_last_result_of_a_sequence() {
    let (driver, session) = create_test_session();
    driver.respond_with(|request| {
        if request.text().starts_with("SELECT") {
            let row = Row::new()
                .with("region", "us")
                .with("id", 7_i64)
                .with("status", Value::Ascii("OPEN".into()))
                .with("tags", vec!["gift"]);
            Ok(RawResult::rows(vec![row]))
        } else {
            Ok(RawResult::default())
        }
    });
    let select = session.select::<Order>().unwrap().where_(eq("tenant", "acme")).and(eq("region", "us")).and(eq("id", 7_i64));
    let sequence = session.sequence().add(session.insert(&order(7)).unwrap()).add(select);

    let result = session.execute(sequence).expect("Failed to run sequence");
    assert_eq!(result.objects::<Order>().unwrap(), vec![order(7)]);
    assert_eq!(driver.texts()[1], "SELECT * FROM shop_acme.orders WHERE region = ? AND id = ?");
}

#[test]
fn it_should_cancel_the_remaining_hops_of_a_sequence() {
    let (driver, session) = create_test_session();
    driver.with_latency(Duration::from_millis(300));
    let sequence = session
        .sequence()
        .add(session.insert(&order(1)).unwrap())
        .add(session.insert(&order(2)).unwrap())
        .add(session.insert(&order(3)).unwrap());

    let future = session.execute_async(sequence).unwrap();
    assert!(future.cancel());
    assert!(!future.cancel());
    assert!(future.is_done());
    assert!(matches!(future.get(), Err(CqlError::Cancelled)));

    thread::sleep(Duration::from_millis(700));
    assert!(driver.requests().len() <= 1);
}

#[test]
fn it_should_time_out_without_stopping_the_work() {
    let driver = testing::RecordingDriver::new().unwrap();
    let mut settings = Settings::default();
    settings.execution.timeout = Duration::from_millis(50);
    let session = Session::new(driver.clone(), settings);
    driver.with_latency(Duration::from_millis(300));

    let mut future = session.execute_async(session.insert(&order(1)).unwrap()).unwrap();
    assert!(matches!(future.get_timeout(Duration::from_millis(50)), Err(CqlError::Timeout(_))));
    assert!(future.get_timeout(Duration::from_secs(5)).is_ok());
    assert!(matches!(session.execute(session.insert(&order(2)).unwrap()), Err(CqlError::Timeout(_))));
}

#[test]
fn it_should_create_a_schema_once_for_concurrent_callers() {
    let (driver, session) = create_test_session();
    driver.with_latency(Duration::from_millis(20));
    let barrier = Arc::new(Barrier::new(8));
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let (session, barrier) = (session.clone(), Arc::clone(&barrier));
            thread::spawn(move || {
                let schema = session.create_schema::<Order>().unwrap().suffix("tenant", "acme");
                barrier.wait();
                session.execute(schema)
            })
        })
        .collect();
    for handle in handles {
        assert!(handle.join().unwrap().is_ok());
    }

    let texts = driver.texts();
    assert_eq!(texts.iter().filter(|t| t.starts_with("CREATE KEYSPACE IF NOT EXISTS shop_acme")).count(), 1);
    assert_eq!(texts.iter().filter(|t| t.starts_with("CREATE TABLE")).count(), 2);
    assert_eq!(texts.len(), 3);

    session.execute(session.create_schema::<Order>().unwrap().suffix("tenant", "acme")).unwrap();
    assert_eq!(driver.requests().len(), 3);
    session.reset_gates().unwrap();
    session.execute(session.create_schema::<Order>().unwrap().suffix("tenant", "acme")).unwrap();
    assert_eq!(driver.requests().len(), 6);
}

#[test]
fn it_should_replay_a_schema_failure_and_allow_a_retry() {
    let (driver, session) = create_test_session();
    let refused = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&refused);
    driver.respond_with(move |request| {
        if request.text().starts_with("CREATE KEYSPACE") && flag.swap(false, Ordering::SeqCst) {
            Err(DriverError::Invalid("replication factor too high".into()))
        } else {
            Ok(RawResult::default())
        }
    });

    let err = session.execute(session.create_schema::<Order>().unwrap().suffix("tenant", "acme")).unwrap_err();
    assert!(matches!(&err, CqlError::SchemaCreation { entity, .. } if entity == "Order"));
    assert_eq!(driver.requests().len(), 1);

    session.execute(session.create_schema::<Order>().unwrap().suffix("tenant", "acme")).expect("retry should run the work again");
    assert!(!refused.load(Ordering::SeqCst));
    assert_eq!(driver.requests().len(), 4);
}

#[test]
fn it_should_reset_a_schema_on_every_request() {
    let (driver, session) = create_test_session();
    for _ in 0..2 {
        session.execute(session.reset_schema::<Order>().unwrap().suffix("tenant", "acme")).unwrap();
    }
    let truncates: BTreeSet<String> = driver.texts().into_iter().filter(|t| t.starts_with("TRUNCATE")).collect();
    assert_eq!(truncates, BTreeSet::from(["TRUNCATE shop_acme.orders".to_string(), "TRUNCATE shop_acme.orders_by_status".to_string()]));
    assert_eq!(driver.requests().len(), 4);
}

#[test]
fn it_should_create_schemas_of_a_namespace() {
    let (driver, session) = create_test_session();
    assert_eq!(session.create_schemas("shop", &acme()).unwrap(), 1);
    assert!(driver.texts().iter().all(|t| t.contains("shop_acme")));

    driver.clear();
    assert_eq!(session.create_schemas("stats", &SuffixValues::new()).unwrap(), 1);
    assert_eq!(driver.texts()[0], "CREATE KEYSPACE IF NOT EXISTS stats WITH replication = {'class': 'SimpleStrategy', 'replication_factor': 1} AND durable_writes = true");
    assert_eq!(session.create_schemas("nowhere", &SuffixValues::new()).unwrap(), 0);
}

#[test]
fn it_should_resolve_entity_metadata_once() {
    let (_driver, session) = create_test_session();
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let session = session.clone();
            thread::spawn(move || session.entity::<Order>().unwrap())
        })
        .collect();
    let resolved: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert!(resolved.windows(2).all(|pair| Arc::ptr_eq(&pair[0], &pair[1])));
    assert!(session.registry().is_resolved::<Order>());
    assert_eq!(session.registry().resolved_count(), 1);
}

#[test]
fn it_should_answer_captured_requests_without_the_driver() {
    let (driver, session) = create_test_session();
    session
        .capture(|request: &Request| -> Option<Result<RawResult, DriverError>> {
            if request.text().starts_with("SELECT") {
                Some(Ok(RawResult::rows(vec![Row::new().with("region", "us").with("id", 9_i64).with("status", "OPEN")])))
            } else {
                None
            }
        })
        .unwrap();

    let select = session.select::<Order>().unwrap().suffix("tenant", "acme").where_(eq("region", "us")).and(eq("id", 9_i64));
    let result = session.execute(select).unwrap();
    assert_eq!(result.len(), 1);
    assert_eq!(result.one::<Order>().unwrap().map(|o| o.tenant), Some("acme".to_string()));
    assert!(driver.requests().is_empty());

    session.clear_captures().unwrap();
    session.execute(session.insert(&order(9)).unwrap()).unwrap();
    assert_eq!(driver.requests().len(), 1);
}

#[test]
fn it_should_report_rejected_conditional_writes() {
    let (driver, session) = create_test_session();
    driver.respond_with(|_| Ok(RawResult::applied(false)));
    let err = session.execute(session.insert(&order(1)).unwrap().if_not_exists()).unwrap_err();
    assert!(matches!(err, CqlError::AlreadyExists(_)));

    let update = session.update(&order(1)).unwrap().set("tags", vec!["rush"]).if_exists();
    assert!(matches!(session.execute(update), Err(CqlError::ConditionNotApplied(_))));
}

#[test]
fn it_should_run_batches_and_counters() {
    let (driver, session) = create_test_session();
    assert!(session.execute(session.batch()).unwrap().is_empty());
    assert!(driver.requests().is_empty());

    let batch = session
        .batch()
        .add(session.update_type::<PageViews>().unwrap().increment("views", 1).where_(eq("page", "home")))
        .and_then(|b| b.add(session.update_type::<PageViews>().unwrap().increment("views", 2).where_(eq("page", "about"))))
        .unwrap();
    session.execute(batch).unwrap();
    let requests = driver.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].batch, Some(BatchKind::Counter));
    assert!(requests[0].text().starts_with("BEGIN COUNTER BATCH UPDATE stats.page_views"));

    let mixed = session.batch().add(session.insert(&order(1)).unwrap()).and_then(|b| {
        b.add(session.update_type::<PageViews>().unwrap().increment("views", 1).where_(eq("page", "home")))
    });
    assert!(matches!(mixed, Err(CqlError::MixedCounterOperation)));
}

#[test]
fn it_should_await_results_on_the_driver_executor() {
    let (driver, session) = create_test_session();
    let outcome = driver.executor().block_on(async {
        let sequence = session.sequence().add(session.insert(&order(1)).unwrap()).add(session.insert(&order(2)).unwrap());
        session.execute_async(sequence)?.await
    });
    assert!(outcome.is_ok());
    assert_eq!(driver.requests().len(), 2);
}
