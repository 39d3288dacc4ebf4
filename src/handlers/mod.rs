pub mod health_handlers;
pub mod llm_endpoint_handlers;
