use cubecl::prelude::*;

use crate::prelude::*;

macro_rules! impl_unary_ops {
    {
    $(
        $name:ident<$t:ident>($input:ident $(, $state:ident)?) => $body:expr;
    )+
    } => {
      $(
          ::paste::paste! {
              impl_unary_ops!([<$name Op>]<$t>($input $(, $state)?) => $body);
          }
      )+
    };

    ($name:ident<$t:ident>($input:ident, $state:ident) => $body:expr) => {
        #[derive(CubeType)]
        pub struct $name<$t: Float> { value: $t }

        #[cube]
        impl<$t: Float> $name<$t> {
            pub fn new(value: $t) -> Self {
                $name::<$t> { value }
            }
        }

        #[cube]
        impl<$t: Float> UnaryOp<$t> for $name<$t> {
            fn apply(&self, $input: $t) -> $t {
                let $state = self.value;
                $body
            }
        }
    };
    ($name:ident<$t:ident>($input:ident) => $body:expr) => {
        #[derive(CubeType)]
        pub struct $name;

        // The CubeType derive doesn't handle unit structs too nicely,
        // so we have to hand-impl this
        ::paste::paste! {
            impl From<$name> for [<$name Expand>] {
                fn from(_: $name) -> Self {
                    [<$name Expand>] {}
                }
            }
        }

        #[cube]
        impl<$t: Float> UnaryOp<$t> for $name {
            fn apply(&self, $input: $t) -> $t {
                $body
            }
        }
    };
}

macro_rules! impl_convenience_fns {
    {
        for $ty:ident;
        $(
            $name:ident<$t:ident>($input:ident $(, $state:ident)?) => $body:expr;
        )+
    }
    => {
        ::paste::paste! {
            $(
                #[cube]
                impl<$t: Float, R: Dim, C: Dim> $ty<$t, R, C> {
                    pub fn [<$name:snake>](&mut self $(, $state: $t)?) {
                        self.apply_unary_op::
                        <
                            impl_convenience_fns! { @generic [<$name Op>] <$t> $(, $state)? }
                        >
                        ([<$name Op>] $( ::new ($state))?);
                    }
                }
            )+
        }
    };

    { @generic $i:ident <$t:ty> , $state:ident } => { $i <$t> };
    { @generic $i:ident <$t:ty> } => { $i };
}

#[cube]
pub trait UnaryOp<F: Float> {
    fn apply(&self, x: F) -> F;
}

macro_rules! with_unary_ops {
    ($callback:path ; $($($arg:tt)+)?) => {
        $callback! {
            $($($arg)+;)?

            Zero<F>(_x) => F::from_int(0);
            OneMinus<F>(x) => F::from_int(1) - x;
            Square<F>(x) => x * x;

            MulScalar<F>(x, f) => x * f;
        }
    };
}

with_unary_ops!(impl_unary_ops;);
with_unary_ops!(impl_convenience_fns; for Rt);

#[cfg(test)]
mod tests {
    use crate::test_utils::TestFloat;
    use crate::unary_ops::*;

    const N: usize = 16;

    #[cube(launch)]
    fn unary_chain<F: Float + CubeElement>(
        input: &Array<F>,
        one_minus: &mut Array<F>,
        square: &mut Array<F>,
        scaled: &mut Array<F>,
        zeroed: &mut Array<F>,
        #[comptime] factor: f32,
    ) {
        let mut rt = Rt::<F, D4, D4>::new();
        let mut tmp = Rt::<F, D4, D4>::new();
        #[unroll]
        for i in 0..N {
            rt.data[i] = input[i];
        }

        tmp.copy_from(&rt);
        tmp.one_minus();
        #[unroll]
        for i in 0..N {
            one_minus[i] = tmp.data[i];
        }

        tmp.copy_from(&rt);
        tmp.square();
        #[unroll]
        for i in 0..N {
            square[i] = tmp.data[i];
        }

        tmp.copy_from(&rt);
        tmp.mul_scalar(F::cast_from(factor));
        #[unroll]
        for i in 0..N {
            scaled[i] = tmp.data[i];
        }

        tmp.zero();
        #[unroll]
        for i in 0..N {
            zeroed[i] = tmp.data[i];
        }
    }

    test_kernel! {
        #[test]
        fn unary_ops_match_scalar_math() for F in [f32] {
            let input: Array = [N] as Uniform(-2.0, 2.0);
            let one_minus: Array = [N];
            let square: Array = [N];
            let scaled: Array = [N];
            let zeroed: Array = [N];

            assert_eq!(
                unary_chain(input(), one_minus(), square(), scaled(), zeroed(), lit(2.5))
                    for (1, 1, 1) @ (1),
                {
                    for i in 0..N {
                        let x = input[i].into_f64();
                        one_minus[i] = F::from_f64(1.0 - x);
                        square[i] = F::from_f64(x * x);
                        scaled[i] = F::from_f64(x * 2.5);
                        zeroed[i] = F::from_f64(0.0);
                    }
                }
            );
        }
    }
}
