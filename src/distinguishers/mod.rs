pub mod cpa;
