use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "bstock API",
        version = "0.1.0",
        description = r#"
# bstock inventory and point-of-sale API

Multi-tenant stock keeping and sales recording for small retailers.

## Authentication

Every `/api/v1` endpoint except health requires a bearer token whose claims
name the user, the organization and the member's role:

```
Authorization: Bearer <jwt>
```

## Plans

Product and member counts are capped by the organization's plan. A request
that would exceed a cap is answered with `403` and a body carrying `limit`,
`current_count` and `upgrade_required: true`.

## Errors

```json
{
  "error": "Bad Request",
  "message": "Insufficient stock",
  "variant_id": "…",
  "available": 2,
  "requested": 5,
  "timestamp": "2025-01-01T00:00:00Z"
}
```
        "#,
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development")
    ),
    tags(
        (name = "Sales", description = "Sale recording and history"),
        (name = "Variants", description = "Stock adjustments and variant maintenance"),
        (name = "Products", description = "Catalog management"),
        (name = "Users", description = "Organization members"),
        (name = "Subscriptions", description = "Plans and the organization's subscription"),
        (name = "Analytics", description = "Revenue and profit reporting"),
        (name = "Health", description = "Health check endpoints")
    ),
    paths(
        // Sales
        crate::handlers::sales::create_sale,
        crate::handlers::sales::list_sales,
        crate::handlers::sales::get_sale,
        crate::handlers::sales::attach_payment_proof,

        // Variants
        crate::handlers::variants::adjust_stock,
        crate::handlers::variants::update_variant,
        crate::handlers::variants::low_stock,
        crate::handlers::variants::list_movements,

        // Products
        crate::handlers::products::create_product,
        crate::handlers::products::list_products,
        crate::handlers::products::get_product,

        // Users
        crate::handlers::users::invite_user,
        crate::handlers::users::list_users,
        crate::handlers::users::remove_user,

        // Subscriptions
        crate::handlers::subscriptions::list_plans,
        crate::handlers::subscriptions::current_subscription,
        crate::handlers::subscriptions::change_plan,

        // Analytics
        crate::handlers::analytics::summary,
        crate::handlers::analytics::top_products,
        crate::handlers::analytics::daily_sales,

        crate::handlers::health::health_check,
    ),
    components(
        schemas(
            crate::entities::sale::Model,
            crate::entities::sale_item::Model,
            crate::entities::variant::Model,
            crate::entities::product::Model,
            crate::entities::plan::Model,
            crate::entities::subscription::Model,
            crate::entities::stock_movement::Model,
            crate::auth::Role,
            crate::services::sales::SaleRequest,
            crate::services::sales::SaleLineRequest,
            crate::services::plan_enforcer::Usage,
            crate::services::plan_enforcer::UsageEntry,
            crate::errors::ErrorResponse
        )
    ),
    modifiers(&BearerAuth)
)]
pub struct ApiDocV1;

struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/swagger-ui")
        .url("/api-docs/openapi.json", ApiDocV1::openapi())
        .config(utoipa_swagger_ui::Config::from("/api-docs/openapi.json").try_it_out_enabled(true))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openapi_lists_core_paths_and_auth() {
        let openapi = ApiDocV1::openapi();
        let json = serde_json::to_string_pretty(&openapi).unwrap();
        assert!(json.contains("bstock API"));
        assert!(json.contains("/api/v1/sales"));
        assert!(json.contains("/api/v1/variants/{id}/adjust-stock"));
        assert!(json.contains("bearer_auth"));
    }
}
