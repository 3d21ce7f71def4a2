mod common;

use std::sync::Arc;

use serde_json::json;

use sales_lakehouse::config::{PipelineConfig, StorageLayout};
use sales_lakehouse::context::PipelineContext;
use sales_lakehouse::error::ErrorClass;
use sales_lakehouse::execution::{
    CancellationToken, PipelineEvent, PipelineObserver, RunOptions, RunStatus, SkipReason, Stage,
    UnitId, UnitStatus,
};
use sales_lakehouse::records::ViewKind;

use common::{RecordingObserver, fixture, flaky_context, load_fixtures, pipeline};

fn stages(start_from: Stage, stop_after: Stage) -> RunOptions {
    RunOptions {
        start_from,
        stop_after,
    }
}

#[test]
fn full_run_publishes_expected_views() {
    let ctx = PipelineContext::in_memory();
    load_fixtures(&ctx);
    let p = pipeline(ctx, 4, 4);

    let report = p.run(&RunOptions::default()).unwrap();
    assert_eq!(report.status, RunStatus::Succeeded);
    assert_eq!(report.units.len(), 10);
    assert_eq!(report.failed_units().count(), 0);

    let customers = report.unit(UnitId::CleanCustomers).unwrap().output.clone().unwrap();
    assert_eq!((customers.rows_in, customers.rows_out), (8, 5));
    let drops = customers.drops.unwrap();
    assert_eq!(drops.duplicate, 1);
    assert_eq!(drops.missing_field, 1);
    assert_eq!(drops.unparseable_date, 1);
    assert_eq!(drops.non_positive_amount, 0);

    let purchases = report.unit(UnitId::CleanPurchases).unwrap().output.clone().unwrap();
    assert_eq!((purchases.rows_in, purchases.rows_out), (14, 8));
    let drops = purchases.drops.unwrap();
    assert_eq!(drops.duplicate, 1);
    assert_eq!(drops.non_positive_amount, 2);
    assert_eq!(drops.unparseable_date, 1);
    assert_eq!(drops.missing_field, 2);

    let countries = report
        .unit(UnitId::Aggregate(ViewKind::CountryStats))
        .unwrap()
        .output
        .clone()
        .unwrap();
    assert_eq!(countries.unresolved, Some(1));

    let summary = report.publish_summary();
    assert_eq!(summary.collections, 4);
    assert_eq!(summary.total_rows, 5 + 4 + 3 + 4);

    let docs = &p.context().documents;
    assert_eq!(
        docs.list_collections().unwrap(),
        vec!["clients_stats", "country_stats", "monthly_stats", "product_stats"]
    );

    let products = docs.find_all("product_stats").unwrap();
    let names: Vec<&str> = products.iter().map(|d| d["produit"].as_str().unwrap()).collect();
    assert_eq!(names, vec!["Laptop", "Monitor", "Keyboard", "Mouse"]);
    assert_eq!(products[0]["nombre_ventes"], json!(2));
    assert_eq!(products[0]["chiffre_affaires"].as_f64(), Some(2350.0));
    assert_eq!(products[0]["prix_moyen"].as_f64(), Some(1175.0));
    assert_eq!(products[0]["prix_min"].as_f64(), Some(1150.0));
    assert_eq!(products[0]["prix_max"].as_f64(), Some(1200.0));
    assert_eq!(products[2]["prix_min"].as_f64(), Some(75.0));
    let revenue: f64 = products.iter().map(|d| d["chiffre_affaires"].as_f64().unwrap()).sum();
    assert_eq!(revenue, 3156.0);

    let monthly = docs.find_all("monthly_stats").unwrap();
    let months: Vec<(&str, i64, f64, i64)> = monthly
        .iter()
        .map(|d| {
            (
                d["annee_mois"].as_str().unwrap(),
                d["nombre_achats"].as_i64().unwrap(),
                d["chiffre_affaires"].as_f64().unwrap(),
                d["nombre_clients_uniques"].as_i64().unwrap(),
            )
        })
        .collect();
    assert_eq!(
        months,
        vec![
            ("2024-01", 3, 2375.5, 2),
            ("2024-02", 3, 405.5, 2),
            ("2024-03", 2, 375.0, 2),
        ]
    );

    let clients = docs.find_all("clients_stats").unwrap();
    let ids: Vec<i64> = clients.iter().map(|d| d["id_client"].as_i64().unwrap()).collect();
    assert_eq!(ids, vec![1, 2, 3, 4, 7]);
    let alice = &clients[0];
    assert_eq!(alice["email"], json!("alice.martin@example.com"));
    assert_eq!(alice["date_inscription"], json!("2023-01-15 00:00:00"));
    assert_eq!(alice["nombre_achats"], json!(2));
    assert_eq!(alice["montant_total"].as_f64(), Some(1225.5));
    assert_eq!(alice["montant_moyen"].as_f64(), Some(612.75));
    assert_eq!(alice["premier_achat"], json!("2024-01-05 10:15:00"));
    assert_eq!(alice["dernier_achat"], json!("2024-01-20 16:40:00"));
    assert_eq!(clients[2]["email"], json!("chiara@example.it"));
    assert!(!clients[0].contains_key("segment"));

    let greta = &clients[4];
    assert_eq!(greta["nombre_achats"], json!(0));
    assert_eq!(greta["montant_total"].as_f64(), Some(0.0));
    assert!(greta["premier_achat"].is_null());
    assert!(greta["dernier_achat"].is_null());

    // Only the purchase of the unknown customer 99 is missing from the per-customer totals.
    let resolved: f64 = clients.iter().map(|d| d["montant_total"].as_f64().unwrap()).sum();
    assert_eq!(resolved, 3156.0 - 75.0);

    let countries = docs.find_all("country_stats").unwrap();
    let rows: Vec<(&str, f64)> = countries
        .iter()
        .map(|d| (d["pays"].as_str().unwrap(), d["chiffre_affaires"].as_f64().unwrap()))
        .collect();
    assert_eq!(
        rows,
        vec![
            ("Germany", 1450.0),
            ("France", 1225.5),
            ("Italy", 325.5),
            ("Spain", 80.0),
        ]
    );
    assert_eq!(countries[0]["nombre_clients"], json!(1));
    assert_eq!(countries[0]["nombre_achats"], json!(2));
}

#[test]
fn rerun_on_filesystem_stores_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = PipelineConfig::default();
    config.object_store.root = dir.path().join("lake");
    config.document_store.root = dir.path().join("warehouse");

    let ctx = PipelineContext::from_config(&config).unwrap();
    load_fixtures(&ctx);
    let p = pipeline(ctx.clone(), 2, 2);

    let snapshot = |ctx: &PipelineContext| {
        let artifacts: Vec<Vec<u8>> = ViewKind::ALL
            .iter()
            .map(|v| ctx.objects.get(&ctx.layout.aggregate_bucket, v.object_key()).unwrap())
            .collect();
        let documents: Vec<_> = ViewKind::ALL
            .iter()
            .map(|v| ctx.documents.find_all(v.collection()).unwrap())
            .collect();
        (artifacts, documents)
    };

    assert!(p.run(&RunOptions::default()).unwrap().is_success());
    let first = snapshot(&ctx);

    assert!(p.run(&RunOptions::default()).unwrap().is_success());
    let second = snapshot(&ctx);

    assert_eq!(first.0, second.0);
    assert_eq!(first.1, second.1);
    assert_eq!(second.1[1].len(), 4);

    // A fresh context over the same directories sees the same published state.
    let reopened = PipelineContext::from_config(&config).unwrap();
    assert_eq!(snapshot(&reopened).1, second.1);
}

#[test]
fn stages_can_be_run_one_at_a_time() {
    let ctx = PipelineContext::in_memory();
    load_fixtures(&ctx);
    let p = pipeline(ctx.clone(), 2, 2);
    let layout = &ctx.layout;

    let report = p.run(&stages(Stage::Clean, Stage::Clean)).unwrap();
    assert_eq!(report.status, RunStatus::Succeeded);
    assert_eq!(report.units.len(), 2);
    assert!(
        ctx.objects
            .exists(&layout.intermediate_bucket, StorageLayout::CLEAN_CUSTOMERS_KEY)
            .unwrap()
    );
    assert!(
        ctx.objects
            .exists(&layout.intermediate_bucket, StorageLayout::CLEAN_PURCHASES_KEY)
            .unwrap()
    );
    assert!(
        !ctx.objects
            .exists(&layout.aggregate_bucket, ViewKind::ProductStats.object_key())
            .unwrap()
    );

    let report = p.run(&stages(Stage::Aggregate, Stage::Aggregate)).unwrap();
    assert_eq!(report.status, RunStatus::Succeeded);
    assert_eq!(report.units.len(), 6);
    let clean = report.unit(UnitId::CleanPurchases).unwrap();
    assert_eq!(clean.status, UnitStatus::Reused);
    assert!(clean.output.is_none());
    assert_eq!(
        report.unit(UnitId::Aggregate(ViewKind::MonthlyStats)).unwrap().status,
        UnitStatus::Succeeded
    );
    assert!(ctx.documents.list_collections().unwrap().is_empty());

    let report = p.run(&stages(Stage::Publish, Stage::Publish)).unwrap();
    assert_eq!(report.status, RunStatus::Succeeded);
    assert_eq!(report.units.len(), 10);
    let reused = report
        .units
        .iter()
        .filter(|u| u.status == UnitStatus::Reused)
        .count();
    assert_eq!(reused, 6);
    assert_eq!(ctx.documents.find_all("product_stats").unwrap().len(), 4);
}

#[test]
fn missing_raw_purchases_fails_only_dependent_units() {
    let ctx = PipelineContext::in_memory();
    let layout = ctx.layout.clone();
    ctx.objects.ensure_bucket(&layout.raw_bucket).unwrap();
    ctx.objects
        .put(&layout.raw_bucket, &layout.raw_customers, &fixture(common::CUSTOMERS_CSV))
        .unwrap();
    let p = pipeline(ctx, 2, 2);

    let report = p.run(&RunOptions::default()).unwrap();
    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(
        report.unit(UnitId::CleanCustomers).unwrap().status,
        UnitStatus::Succeeded
    );

    let failed = report.unit(UnitId::CleanPurchases).unwrap();
    assert_eq!(failed.attempts, 1);
    match &failed.status {
        UnitStatus::Failed { class, error } => {
            assert_eq!(*class, ErrorClass::Structural);
            assert!(error.contains("achats.csv"), "unexpected error: {error}");
        }
        other => panic!("expected failure, got {other:?}"),
    }

    for view in ViewKind::ALL {
        assert_eq!(
            report.unit(UnitId::Aggregate(view)).unwrap().status,
            UnitStatus::Skipped {
                reason: SkipReason::UpstreamFailed {
                    unit: UnitId::CleanPurchases
                }
            }
        );
        assert_eq!(
            report.unit(UnitId::Publish(view)).unwrap().status,
            UnitStatus::Skipped {
                reason: SkipReason::UpstreamFailed {
                    unit: UnitId::Aggregate(view)
                }
            }
        );
    }
    assert!(p.context().documents.list_collections().unwrap().is_empty());

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["status"], json!("failed"));
}

#[test]
fn transient_read_failures_are_retried() {
    let (ctx, store) = flaky_context("achats.csv");
    load_fixtures(&ctx);
    store.fail_next(2);
    let p = pipeline(ctx, 2, 2);

    let report = p.run(&RunOptions::default()).unwrap();
    assert_eq!(report.status, RunStatus::Succeeded);
    let clean = report.unit(UnitId::CleanPurchases).unwrap();
    assert_eq!(clean.attempts, 3);
    assert_eq!(clean.status, UnitStatus::Succeeded);
    assert_eq!(report.unit(UnitId::CleanCustomers).unwrap().attempts, 1);
    assert_eq!(store.gets(), 3);
    assert_eq!(p.metrics().snapshot().retries, 2);
}

#[test]
fn exhausted_retries_report_a_transient_failure() {
    let (ctx, store) = flaky_context("achats.csv");
    load_fixtures(&ctx);
    store.fail_next(10);
    let p = pipeline(ctx, 2, 2);

    let report = p.run(&RunOptions::default()).unwrap();
    assert_eq!(report.status, RunStatus::Failed);
    let clean = report.unit(UnitId::CleanPurchases).unwrap();
    assert_eq!(clean.attempts, 3);
    assert!(matches!(
        clean.status,
        UnitStatus::Failed {
            class: ErrorClass::Transient,
            ..
        }
    ));
    assert_eq!(store.gets(), 3);
    assert_eq!(report.failed_units().count(), 1);
}

#[test]
fn failed_publish_keeps_previous_collection() {
    let ctx = PipelineContext::in_memory();
    load_fixtures(&ctx);
    let p = pipeline(ctx.clone(), 2, 2);
    assert!(p.run(&RunOptions::default()).unwrap().is_success());
    let before = ctx.documents.find_all("product_stats").unwrap();

    ctx.objects
        .put(
            &ctx.layout.aggregate_bucket,
            ViewKind::ProductStats.object_key(),
            b"not a parquet file",
        )
        .unwrap();

    let report = p.run(&stages(Stage::Publish, Stage::Publish)).unwrap();
    assert_eq!(report.status, RunStatus::Failed);
    let publish = report.unit(UnitId::Publish(ViewKind::ProductStats)).unwrap();
    assert_eq!(publish.attempts, 1);
    assert!(matches!(
        publish.status,
        UnitStatus::Failed {
            class: ErrorClass::Structural,
            ..
        }
    ));
    assert_eq!(
        report.unit(UnitId::Publish(ViewKind::MonthlyStats)).unwrap().status,
        UnitStatus::Succeeded
    );
    assert_eq!(ctx.documents.find_all("product_stats").unwrap(), before);
}

#[test]
fn units_start_only_after_their_dependencies_finish() {
    let ctx = PipelineContext::in_memory();
    load_fixtures(&ctx);
    let recorder = Arc::new(RecordingObserver::default());
    let p = pipeline(ctx, 4, 4).with_observer(recorder.clone());
    assert!(p.run(&RunOptions::default()).unwrap().is_success());

    let events = recorder.events.lock().unwrap();
    assert!(matches!(events.first(), Some(PipelineEvent::RunStarted { units: 10 })));
    assert!(matches!(events.last(), Some(PipelineEvent::RunFinished { .. })));

    let finished_at = |unit: UnitId| {
        events
            .iter()
            .position(|e| matches!(e, PipelineEvent::UnitFinished { report } if report.unit == unit))
            .unwrap()
    };
    for (pos, event) in events.iter().enumerate() {
        if let PipelineEvent::UnitStarted { unit, .. } = event {
            for dep in unit.dependencies() {
                assert!(finished_at(dep) < pos, "{unit} started before {dep} finished");
            }
        }
    }
}

/// Cancels the run as soon as the first unit finishes.
struct CancelOnFirstFinish(CancellationToken);

impl PipelineObserver for CancelOnFirstFinish {
    fn on_event(&self, event: &PipelineEvent) {
        if matches!(event, PipelineEvent::UnitFinished { .. }) {
            self.0.cancel();
        }
    }
}

#[test]
fn cancellation_lets_the_running_unit_finish_and_skips_the_rest() {
    let ctx = PipelineContext::in_memory();
    load_fixtures(&ctx);
    let cancel = CancellationToken::new();
    let p = pipeline(ctx, 1, 1).with_observer(Arc::new(CancelOnFirstFinish(cancel.clone())));

    let report = p.run_with_cancel(&RunOptions::default(), &cancel).unwrap();
    assert_eq!(report.status, RunStatus::Cancelled);

    let succeeded: Vec<UnitId> = report
        .units
        .iter()
        .filter(|u| u.status == UnitStatus::Succeeded)
        .map(|u| u.unit)
        .collect();
    assert_eq!(succeeded.len(), 1);
    assert_eq!(succeeded[0].stage(), Stage::Clean);
    assert!(report.units.iter().all(|u| u.status == UnitStatus::Succeeded
        || u.status
            == UnitStatus::Skipped {
                reason: SkipReason::Cancelled
            }));
    assert!(p.context().documents.list_collections().unwrap().is_empty());
}

#[test]
fn in_flight_units_are_capped_below_worker_count() {
    let ctx = PipelineContext::in_memory();
    load_fixtures(&ctx);
    let p = pipeline(ctx, 4, 1);

    assert!(p.run(&RunOptions::default()).unwrap().is_success());
    let m = p.metrics().snapshot();
    assert_eq!(m.units_succeeded, 10);
    assert_eq!(m.max_active_units, 1);
    assert!(m.elapsed.is_some());
}
