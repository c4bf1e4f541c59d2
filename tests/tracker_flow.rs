//! End-to-end tracker behaviour against in-memory SQLite, a scripted quote
//! gateway and a recording notification sink.

mod common;

use chrono::Duration;
use common::{harness, local};

use stock_tracker::application::actors::{TickMessage, TickRequest};
use stock_tracker::application::services::tracker_service::TrackingSettingsUpdate;
use stock_tracker::application::services::DispatchOutcome;
use stock_tracker::domain::entities::transaction::Side;
use stock_tracker::domain::errors::TrackerError;
use stock_tracker::domain::repositories::MarketSnapshot;
use stock_tracker::domain::services::session::WindowKind;
use stock_tracker::domain::services::signals::{Signal, VolumeConfirmation};

fn approx(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-6
}

#[tokio::test]
async fn test_buys_build_weighted_position_and_lots() {
    let h = harness(local(10, 0)).await;

    h.service.record_transaction(1, "vic", Side::Buy, 100.0, 50_000.0).await.unwrap();
    h.service.record_transaction(1, "VIC", Side::Buy, 50.0, 55_000.0).await.unwrap();

    let positions = h.service.get_positions(1).await.unwrap();
    assert_eq!(positions.len(), 1);
    let vic = &positions[0];
    assert_eq!(vic.symbol, "VIC");
    assert!(approx(vic.quantity, 150.0));
    assert!((vic.avg_cost - 51_666.67).abs() < 0.01);
    assert!((vic.effective_avg_cost - 51_666.67).abs() < 0.01);
    let lots: Vec<(f64, f64)> = vic.lots.iter().map(|l| (l.quantity, l.unit_cost)).collect();
    assert_eq!(lots, vec![(100.0, 50_000.0), (50.0, 55_000.0)]);
}

#[tokio::test]
async fn test_sell_consumes_oldest_lots_first() {
    let h = harness(local(10, 0)).await;

    h.service.record_transaction(1, "VIC", Side::Buy, 100.0, 50_000.0).await.unwrap();
    h.service.record_transaction(1, "VIC", Side::Buy, 50.0, 55_000.0).await.unwrap();
    h.service.record_transaction(1, "VIC", Side::Sell, 120.0, 60_000.0).await.unwrap();

    let positions = h.service.get_positions(1).await.unwrap();
    let vic = &positions[0];
    assert!(approx(vic.quantity, 30.0));
    // The running average ignores sells; the FIFO basis does not.
    assert!((vic.avg_cost - 51_666.67).abs() < 0.01);
    assert!(approx(vic.effective_avg_cost, 55_000.0));
    assert_eq!(vic.lots.len(), 1);
    assert!(approx(vic.lots[0].quantity, 30.0));
    assert!(approx(vic.lots[0].unit_cost, 55_000.0));
}

#[tokio::test]
async fn test_same_timestamp_trades_replay_in_insertion_order() {
    let h = harness(local(10, 0)).await;

    h.service.record_transaction(1, "HPG", Side::Buy, 100.0, 10.0).await.unwrap();
    h.service.record_transaction(1, "HPG", Side::Buy, 100.0, 20.0).await.unwrap();
    h.service.record_transaction(1, "HPG", Side::Sell, 150.0, 25.0).await.unwrap();

    let positions = h.service.get_positions(1).await.unwrap();
    assert_eq!(positions[0].lots.len(), 1);
    assert!(approx(positions[0].lots[0].quantity, 50.0));
    assert!(approx(positions[0].lots[0].unit_cost, 20.0));
}

#[tokio::test]
async fn test_invalid_input_is_never_persisted() {
    let h = harness(local(10, 0)).await;

    let zero = h.service.record_transaction(1, "VIC", Side::Buy, 0.0, 50_000.0).await;
    assert!(matches!(zero, Err(TrackerError::InvalidInput(_))));
    let negative = h.service.record_transaction(1, "VIC", Side::Buy, 10.0, -1.0).await;
    assert!(matches!(negative, Err(TrackerError::InvalidInput(_))));
    let blank = h.service.record_transaction(1, "  ", Side::Buy, 10.0, 1.0).await;
    assert!(matches!(blank, Err(TrackerError::InvalidInput(_))));

    assert!(h.service.get_positions(1).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_oversell_clamps_and_closes_position() {
    let h = harness(local(10, 0)).await;

    h.service.record_transaction(1, "FPT", Side::Buy, 10.0, 100.0).await.unwrap();
    let recorded = h
        .service
        .record_transaction(1, "FPT", Side::Sell, 15.0, 110.0)
        .await
        .unwrap();

    assert!(approx(recorded.update.oversold, 5.0));
    assert!(h.service.get_positions(1).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_trailing_stop_ratchets_then_fires() {
    let h = harness(local(10, 0)).await;
    h.service.register_user(1, "chat-1").await.unwrap();
    h.service.record_transaction(1, "HPG", Side::Buy, 100.0, 35.0).await.unwrap();

    h.gateway.set_price("HPG", 30.0);
    let armed = h.service.set_trailing_stop(1, "HPG", Some(0.10)).await.unwrap();
    assert!(approx(armed.highest_price, 30.0));
    assert!(approx(armed.trailing_stop_price, 27.0));

    h.gateway.set_price("HPG", 36.0);
    let (report, _) = h.service.tick(1).await.unwrap();
    assert!(report.symbols[0].signals.is_empty());
    let status = h.service.get_tracking_status(1).await.unwrap();
    assert!(approx(status.trailing_stops[0].highest_price, 36.0));
    assert!(approx(status.trailing_stops[0].trailing_stop_price, 32.4));

    h.gateway.set_price("HPG", 32.5);
    let (report, _) = h.service.tick(1).await.unwrap();
    assert!(report.symbols[0].signals.is_empty());

    h.gateway.set_price("HPG", 32.3);
    let (report, outcome) = h.service.tick(1).await.unwrap();
    assert_eq!(outcome, DispatchOutcome::Sent);
    assert_eq!(report.symbols[0].signals.len(), 1);
    assert!(matches!(
        report.symbols[0].signals[0],
        Signal::TrailingStop { stop_price, .. } if approx(stop_price, 32.4)
    ));
    assert!(h.sink.last_text().unwrap().contains("SELL HPG"));

    // The high-water mark never moves down.
    let status = h.service.get_tracking_status(1).await.unwrap();
    assert!(approx(status.trailing_stops[0].highest_price, 36.0));
}

#[tokio::test]
async fn test_retuning_trailing_stop_keeps_high_water_mark() {
    let h = harness(local(10, 0)).await;
    h.service.record_transaction(1, "HPG", Side::Buy, 100.0, 25.0).await.unwrap();

    h.gateway.set_price("HPG", 30.0);
    h.service.set_trailing_stop(1, "HPG", Some(0.10)).await.unwrap();
    h.gateway.set_price("HPG", 36.0);
    h.service.tick(1).await.unwrap();

    h.gateway.set_price("HPG", 33.0);
    let retuned = h.service.set_trailing_stop(1, "HPG", Some(0.05)).await.unwrap();
    assert!(retuned.enabled);
    assert!(approx(retuned.highest_price, 36.0));
    assert!(approx(retuned.trailing_stop_price, 34.2));

    // A disabled stop starts over from the current price.
    h.service.set_trailing_stop(1, "HPG", None).await.unwrap();
    let rearmed = h.service.set_trailing_stop(1, "HPG", Some(0.10)).await.unwrap();
    assert!(approx(rearmed.highest_price, 33.0));
    assert!(approx(rearmed.trailing_stop_price, 29.7));
}

#[tokio::test]
async fn test_trailing_stop_without_quote_seeds_on_first_tick() {
    let h = harness(local(10, 0)).await;
    h.service.record_transaction(1, "MWG", Side::Buy, 10.0, 50.0).await.unwrap();

    let armed = h.service.set_trailing_stop(1, "MWG", Some(0.05)).await.unwrap();
    assert_eq!(armed.highest_price, 0.0);

    h.gateway.set_price("MWG", 52.0);
    h.service.tick(1).await.unwrap();
    let status = h.service.get_tracking_status(1).await.unwrap();
    assert!(approx(status.trailing_stops[0].highest_price, 52.0));

    let disabled = h.service.set_trailing_stop(1, "MWG", None).await.unwrap();
    assert!(!disabled.enabled);
}

#[tokio::test]
async fn test_stoploss_fires_without_volume_data() {
    let h = harness(local(10, 0)).await;
    h.service.register_user(1, "chat-1").await.unwrap();
    h.service.record_transaction(1, "VIC", Side::Buy, 100.0, 50_000.0).await.unwrap();

    h.gateway.set_price("VIC", 46_001.0);
    let (report, _) = h.service.tick(1).await.unwrap();
    assert!(report.symbols[0].signals.is_empty());

    h.gateway.set_price("VIC", 45_999.0);
    let (report, outcome) = h.service.tick(1).await.unwrap();
    assert_eq!(outcome, DispatchOutcome::Sent);
    match &report.symbols[0].signals[0] {
        Signal::StopLoss { threshold, .. } => assert!(approx(*threshold, 46_000.0)),
        other => panic!("unexpected signal {:?}", other),
    }
    let text = h.sink.last_text().unwrap();
    assert!(text.contains("🔴 SELL VIC"));
    assert!(text.contains("(-8.00%)"));
}

#[tokio::test]
async fn test_symbol_stoploss_overrides_default() {
    let h = harness(local(10, 0)).await;
    h.service.record_transaction(1, "VIC", Side::Buy, 100.0, 50_000.0).await.unwrap();
    h.service.set_symbol_stop_loss(1, "vic", 0.05).await.unwrap();

    h.gateway.set_price("VIC", 47_400.0);
    let (report, _) = h.service.tick(1).await.unwrap();
    assert!(matches!(report.symbols[0].signals[0], Signal::StopLoss { .. }));

    assert!(matches!(
        h.service.set_symbol_stop_loss(1, "VIC", 1.5).await,
        Err(TrackerError::InvalidInput(_))
    ));
}

#[tokio::test]
async fn test_take_profit_reports_volume_confirmation() {
    let h = harness(local(10, 0)).await;
    h.service.record_transaction(1, "FPT", Side::Buy, 100.0, 100.0).await.unwrap();

    h.gateway.set_snapshot(
        "FPT",
        MarketSnapshot {
            price: 116.0,
            volume: Some(2_000.0),
            volume_ma: Some(1_000.0),
            volume_std: None,
        },
    );
    let (report, _) = h.service.tick(1).await.unwrap();
    assert!(report.symbols[0].signals.iter().any(|s| matches!(
        s,
        Signal::TakeProfit {
            confirmation: VolumeConfirmation::Confirmed,
            ..
        }
    )));

    h.gateway.set_price("FPT", 116.0);
    let (report, _) = h.service.tick(1).await.unwrap();
    assert!(matches!(
        report.symbols[0].signals[0],
        Signal::TakeProfit {
            confirmation: VolumeConfirmation::Unavailable,
            ..
        }
    ));
}

#[tokio::test]
async fn test_unavailable_symbol_does_not_block_others() {
    let h = harness(local(10, 0)).await;
    h.service.register_user(1, "chat-1").await.unwrap();
    h.service.record_transaction(1, "FPT", Side::Buy, 10.0, 100.0).await.unwrap();
    h.service.record_transaction(1, "VIC", Side::Buy, 100.0, 50_000.0).await.unwrap();
    h.gateway.set_price("VIC", 51_000.0);

    let (report, outcome) = h.service.tick(1).await.unwrap();
    assert_eq!(outcome, DispatchOutcome::Sent);
    assert_eq!(report.symbols[0].symbol, "FPT");
    assert_eq!(report.symbols[0].price, None);
    assert_eq!(report.symbols[1].pnl, Some(100_000.0));
    assert_eq!(report.total_pnl(), Some(100_000.0));

    let text = h.sink.last_text().unwrap();
    assert!(text.contains("Price: N/A | P&L: N/A"));
    assert!(text.contains("Total P&L: +100000.00"));

    let pnl = h.service.get_pnl(1).await.unwrap();
    assert_eq!(pnl.total_pnl, Some(100_000.0));
}

#[tokio::test]
async fn test_delivery_failures_are_reported_not_raised() {
    let h = harness(local(10, 0)).await;
    h.service.record_transaction(1, "VIC", Side::Buy, 1.0, 10.0).await.unwrap();
    h.gateway.set_price("VIC", 11.0);

    let (_, outcome) = h.service.tick(1).await.unwrap();
    assert_eq!(outcome, DispatchOutcome::NoChannel);

    h.service.register_user(1, "chat-1").await.unwrap();
    *h.sink.failing.lock().unwrap() = true;
    let (_, outcome) = h.service.tick(1).await.unwrap();
    assert!(matches!(outcome, DispatchOutcome::Failed(_)));
}

#[tokio::test]
async fn test_watchlist_buy_opportunity() {
    let h = harness(local(10, 0)).await;
    h.service.register_user(1, "chat-1").await.unwrap();
    h.service
        .add_to_watchlist(1, "mwg", Some(60.0), Some("  dip buy ".to_string()))
        .await
        .unwrap();
    h.gateway.set_price("MWG", 59.5);

    let watchlist = h.service.get_watchlist(1).await.unwrap();
    assert_eq!(watchlist[0].notes.as_deref(), Some("dip buy"));

    let (report, _) = h.service.tick(1).await.unwrap();
    assert!(matches!(report.watchlist[0], Signal::BuyOpportunity { .. }));
    let text = h.sink.last_text().unwrap();
    assert!(text.starts_with("Portfolio is empty."));
    assert!(text.contains("CONSIDER BUYING MWG"));

    h.service.remove_from_watchlist(1, "MWG").await.unwrap();
    assert!(matches!(
        h.service.remove_from_watchlist(1, "MWG").await,
        Err(TrackerError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_quiet_scheduled_tick_uses_compact_layout() {
    let h = harness(local(11, 5)).await;
    h.service.register_user(1, "chat-1").await.unwrap();
    h.service.record_transaction(1, "VIC", Side::Buy, 100.0, 50_000.0).await.unwrap();
    h.gateway.set_price("VIC", 51_000.0);

    h.service
        .run_scheduled_tick(TickRequest {
            user_id: 1,
            window: WindowKind::Midday,
            scheduled_for: local(11, 5),
        })
        .await;

    let text = h.sink.last_text().unwrap();
    assert!(text.starts_with("⏱ · midday · 11:05 16/10"));
    assert!(text.contains("VIC 51000.00 (+100000.00)"));
}

#[tokio::test]
async fn test_scheduled_tick_with_nothing_to_report_is_silent() {
    let h = harness(local(11, 5)).await;
    h.service.register_user(1, "chat-1").await.unwrap();

    h.service
        .run_scheduled_tick(TickRequest {
            user_id: 1,
            window: WindowKind::Midday,
            scheduled_for: local(11, 5),
        })
        .await;

    assert!(h.sink.messages().is_empty());
}

#[tokio::test]
async fn test_enabling_mid_session_skips_past_windows() {
    let mut h = harness(local(11, 0)).await;

    let status = h
        .service
        .set_tracking_enabled(1, true, TrackingSettingsUpdate::default())
        .await
        .unwrap();
    assert!(status.config.enabled);
    let windows: Vec<_> = status.scheduled_jobs.iter().map(|j| j.window).collect();
    assert_eq!(
        windows,
        vec![
            WindowKind::Midday,
            WindowKind::Afternoon,
            WindowKind::PostClose,
            WindowKind::DailySummary,
        ]
    );

    // The current window fires straight away.
    match h.ticks.recv().await {
        Some(TickMessage::Tick(request)) => {
            assert_eq!(request.window, WindowKind::Midday);
            assert_eq!(request.scheduled_for, local(11, 0));
        }
        other => panic!("expected an immediate tick, got {:?}", other),
    }

    // Re-enabling replaces rather than duplicates.
    h.service.set_tracking_enabled(1, true, TrackingSettingsUpdate::default()).await.unwrap();
    assert_eq!(h.service.scheduled_jobs(1).len(), 4);

    let status = h
        .service
        .set_tracking_enabled(1, false, TrackingSettingsUpdate::default())
        .await
        .unwrap();
    assert!(!status.config.enabled);
    assert!(status.scheduled_jobs.is_empty());
}

#[tokio::test]
async fn test_arm_enabled_users_on_startup() {
    let h = harness(local(8, 0)).await;
    h.service.set_tracking_enabled(1, true, TrackingSettingsUpdate::default()).await.unwrap();
    h.service.set_tracking_enabled(2, true, TrackingSettingsUpdate::default()).await.unwrap();
    h.service.set_tracking_enabled(3, false, TrackingSettingsUpdate::default()).await.unwrap();
    h.service.shutdown();
    assert!(h.service.scheduled_jobs(1).is_empty());

    assert_eq!(h.service.arm_enabled_users().await.unwrap(), 2);
    assert_eq!(h.service.scheduled_jobs(1).len(), 6);
    assert_eq!(h.service.scheduled_jobs(2).len(), 6);
    assert!(h.service.scheduled_jobs(3).is_empty());
}

#[tokio::test]
async fn test_settings_update_validates_and_persists() {
    let h = harness(local(10, 0)).await;

    let config = h
        .service
        .update_tracking_settings(
            1,
            TrackingSettingsUpdate {
                stoploss_pct: Some(0.05),
                take_profit_pct: Some(0.30),
                volume_ma_days: Some(10),
            },
        )
        .await
        .unwrap();
    assert_eq!(config.volume_ma_days, 10);

    let status = h.service.get_tracking_status(1).await.unwrap();
    assert!(approx(status.config.stoploss_pct, 0.05));
    assert!(approx(status.config.take_profit_pct, 0.30));

    let rejected = h
        .service
        .update_tracking_settings(
            1,
            TrackingSettingsUpdate {
                volume_ma_days: Some(0),
                ..Default::default()
            },
        )
        .await;
    assert!(matches!(rejected, Err(TrackerError::InvalidInput(_))));
}

#[tokio::test]
async fn test_enabling_with_settings_is_one_write() {
    let h = harness(local(8, 0)).await;

    let status = h
        .service
        .set_tracking_enabled(
            1,
            true,
            TrackingSettingsUpdate {
                stoploss_pct: Some(0.06),
                take_profit_pct: Some(0.25),
                volume_ma_days: Some(15),
            },
        )
        .await
        .unwrap();
    assert!(status.config.enabled);
    assert!(approx(status.config.stoploss_pct, 0.06));
    assert!(approx(status.config.take_profit_pct, 0.25));
    assert_eq!(status.config.volume_ma_days, 15);
    assert_eq!(status.scheduled_jobs.len(), 6);

    // A bad value rejects the whole request: still enabled, nothing changed.
    let rejected = h
        .service
        .set_tracking_enabled(
            1,
            false,
            TrackingSettingsUpdate {
                stoploss_pct: Some(0.02),
                take_profit_pct: Some(-1.0),
                ..Default::default()
            },
        )
        .await;
    assert!(matches!(rejected, Err(TrackerError::InvalidInput(_))));

    let status = h.service.get_tracking_status(1).await.unwrap();
    assert!(status.config.enabled);
    assert!(approx(status.config.stoploss_pct, 0.06));
    assert_eq!(status.scheduled_jobs.len(), 6);
}

#[tokio::test]
async fn test_reset_requires_timely_confirmation() {
    let h = harness(local(10, 0)).await;
    h.service.register_user(1, "chat-1").await.unwrap();
    h.service.record_transaction(1, "VIC", Side::Buy, 10.0, 50_000.0).await.unwrap();
    h.service.set_tracking_enabled(1, true, TrackingSettingsUpdate::default()).await.unwrap();

    assert!(matches!(
        h.service.confirm_reset(1).await,
        Err(TrackerError::ResetNotPending)
    ));

    h.service.request_reset(1);
    h.clock.advance(Duration::seconds(121));
    assert!(matches!(
        h.service.confirm_reset(1).await,
        Err(TrackerError::ResetExpired { .. })
    ));
    assert_eq!(h.service.get_positions(1).await.unwrap().len(), 1);

    h.service.request_reset(1);
    assert!(h.service.cancel_reset(1));
    assert!(!h.service.cancel_reset(1));

    h.service.request_reset(1);
    h.service.confirm_reset(1).await.unwrap();
    assert!(h.service.get_positions(1).await.unwrap().is_empty());
    assert!(h.service.scheduled_jobs(1).is_empty());
    assert!(!h.service.get_tracking_status(1).await.unwrap().config.enabled);

    // The channel survives a reset.
    let (_, outcome) = h.service.tick(1).await.unwrap();
    assert_eq!(outcome, DispatchOutcome::Sent);
    assert_eq!(h.sink.last_text().unwrap(), "Portfolio is empty.");
}
