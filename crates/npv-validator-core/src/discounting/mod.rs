pub mod curve;
pub mod present_value;

pub use curve::{
    df_from_zero, zero_from_df, CurvePoint, DiscountFactorCurve, InterpolationPolicy, YieldCurve,
};
pub use present_value::{discounted_flows, present_value, DiscountedCashFlow};
