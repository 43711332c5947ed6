pub mod materialized_view;
pub mod table;
