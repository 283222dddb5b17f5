use axum::routing::{delete, get, patch, post, put};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::app::AppState;
use crate::config::{create_cors_layer, create_security_headers_layer};
use crate::handlers::{auth, bookings, client_config, facilities, health_check, payments, ws};

pub fn create_routes(state: AppState) -> Router {
    let auth_routes = Router::new()
        .route("/register", post(auth::register))
        .route("/login", post(auth::login))
        .route("/me", get(auth::me).put(auth::update_me));

    let facility_routes = Router::new()
        .route(
            "/",
            get(facilities::search_facilities).post(facilities::create_facility),
        )
        .route(
            "/:id",
            get(facilities::get_facility)
                .put(facilities::update_facility)
                .delete(facilities::delete_facility),
        )
        .route(
            "/:id/floors",
            get(facilities::list_floors).post(facilities::add_floor),
        )
        .route("/:id/slots", get(facilities::list_slots))
        .route(
            "/:id/pricing",
            get(facilities::list_pricing).put(facilities::upsert_pricing),
        )
        .route(
            "/:id/pricing/:vehicle_type",
            delete(facilities::delete_pricing),
        );

    let inventory_routes = Router::new()
        .route("/floors/:id", delete(facilities::delete_floor))
        .route("/floors/:id/slots", post(facilities::create_slot))
        .route("/floors/:id/slots/bulk", post(facilities::bulk_create_slots))
        .route("/slots/:id", delete(facilities::delete_slot))
        .route("/slots/:id/status", patch(facilities::set_slot_status));

    let booking_routes = Router::new()
        .route(
            "/",
            get(bookings::booking_history).post(bookings::create_booking),
        )
        .route("/verify-qr", post(bookings::verify_qr))
        .route("/:id/qr", get(bookings::booking_qr))
        .route("/:id/check-in", post(bookings::check_in))
        .route("/:id/complete", post(bookings::complete))
        .route("/:id/cancel", post(bookings::cancel));

    let provider_routes = Router::new()
        .route("/facilities", get(facilities::provider_facilities))
        .route("/bookings", get(bookings::provider_bookings))
        .route("/bookings/export", get(bookings::export_bookings));

    let mut payment_routes = Router::new()
        .route("/quote", post(payments::quote))
        .route("/order", post(payments::create_order))
        .route("/webhook", post(payments::webhook));
    if state.payments.name() == "mock" {
        payment_routes =
            payment_routes.route("/mock/:order_id/pay", post(payments::mock_checkout));
    }

    let api = Router::new()
        .nest("/auth", auth_routes)
        .nest("/facilities", facility_routes)
        .nest("/bookings", booking_routes)
        .nest("/provider", provider_routes)
        .nest("/payments", payment_routes)
        .merge(inventory_routes)
        .route("/config", get(client_config))
        .route("/ws", get(ws::slot_updates));

    let production = state.config.production;
    let cors = create_cors_layer(state.config.cors_allowed_origins.as_deref());

    Router::new()
        .route("/health", get(health_check))
        .nest("/api", api)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(create_security_headers_layer(production))
        .layer(cors)
}
