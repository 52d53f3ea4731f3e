pub mod amm_v4_math;
