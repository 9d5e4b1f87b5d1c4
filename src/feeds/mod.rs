pub mod option_chain;
