pub mod calling_context;
