pub mod operator;

pub use operator::operator_auth_middleware;
