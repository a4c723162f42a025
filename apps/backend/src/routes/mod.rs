use actix_web::web;

pub mod db_example;
pub mod health;

/// Register every route. Middleware is wired by the caller.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.configure(health::configure_routes);
    cfg.service(web::scope("/db").configure(db_example::configure_routes));
}
