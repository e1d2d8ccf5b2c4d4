use actix_web::web;

use crate::handlers::{auth, health, users};

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health::health_check))
        .service(
            web::scope("/auth")
                .route("/login", web::post().to(auth::login))
                .route("/refresh", web::post().to(auth::refresh))
                .route("/logout", web::post().to(auth::logout))
                .route("/me", web::get().to(auth::me)),
        )
        .service(
            web::scope("/users")
                .route("", web::post().to(users::create_user))
                .route("/{id}/password", web::put().to(users::change_password))
                .route("/{id}/roles", web::put().to(users::assign_roles))
                .route("/{id}", web::delete().to(users::deactivate_user)),
        );
}
