use cubecl::prelude::*;

use crate::prelude::*;

#[cube]
pub trait BinaryOp<F: Float> {
    fn apply(&self, dst: F, src: F) -> F;
}

macro_rules! impl_binary_ops {
    {
    $(
        $name:ident<$t:ident>($dst:ident, $src:ident) => $body:expr;
    )+
    } => {
    $(
        ::paste::paste! {
            #[derive(CubeType)]
            pub struct [<$name Op>];

            // The CubeType derive doesn't handle unit structs too nicely,
            // so we have to hand-impl this
            impl From<[<$name Op>]> for [<$name OpExpand>] {
                fn from(_: [<$name Op>]) -> Self {
                    [<$name OpExpand>] {}
                }
            }

            #[cube]
            impl<$t: Float> BinaryOp<$t> for [<$name Op>] {
                fn apply(&self, $dst: $t, $src: $t) -> $t {
                    $body
                }
            }
        }
    )+
    };
}

macro_rules! impl_binary_convenience_fns {
    {
        for $ty:ident;
        $(
            $name:ident<$t:ident>($dst:ident, $src:ident) => $body:expr;
        )+
    }
    => {
        ::paste::paste! {
            $(
                #[cube]
                impl<$t: Float, R: Dim, C: Dim> $ty<$t, R, C> {
                    pub fn [<$name:snake>](&mut self, other: &$ty<$t, R, C>) {
                        self.apply_binary_op::<[<$name Op>]>([<$name Op>], other);
                    }
                }
            )+
        }
    };
}

macro_rules! with_binary_ops {
    ($callback:path ; $($($arg:tt)+)?) => {
        $callback! {
            $($($arg)+;)?

            Add<F>(dst, src) => dst + src;
            Sub<F>(dst, src) => dst - src;
            Mul<F>(dst, src) => dst * src;
        }
    };
}

with_binary_ops!(impl_binary_ops;);
with_binary_ops!(impl_binary_convenience_fns; for Rt);

#[cfg(test)]
mod tests {
    use crate::binary_ops::*;
    use crate::test_utils::TestFloat;

    const N: usize = 16;

    macro_rules! generate_binary_kernel {
        ($name:ident, $method:ident) => {
            #[cube(launch)]
            fn $name<F: Float + CubeElement>(
                a: &Array<F>,
                b: &Array<F>,
                output: &mut Array<F>,
            ) {
                let mut rt_a = Rt::<F, D4, D4>::new();
                let mut rt_b = Rt::<F, D4, D4>::new();
                #[unroll]
                for i in 0..N {
                    rt_a.data[i] = a[i];
                    rt_b.data[i] = b[i];
                }
                rt_a.$method(&rt_b);
                #[unroll]
                for i in 0..N {
                    output[i] = rt_a.data[i];
                }
            }
        };
    }

    generate_binary_kernel!(test_add_kernel, add);
    generate_binary_kernel!(test_sub_kernel, sub);
    generate_binary_kernel!(test_mul_kernel, mul);

    test_kernel! {
        #[test]
        fn test_add() for F in [f32] {
            let a: Array = [N] as Uniform(-10.0, 10.0);
            let b: Array = [N] as Uniform(-10.0, 10.0);
            let output: Array = [N];

            assert_eq!(
                test_add_kernel(a(), b(), output()) for (1, 1, 1) @ (1),
                {
                    for i in 0..output.len() {
                        output[i] = F::from_f64(a[i].into_f64() + b[i].into_f64());
                    }
                }
            );
        }

        #[test]
        fn test_sub() for F in [f32] {
            let a: Array = [N] as Uniform(-10.0, 10.0);
            let b: Array = [N] as Uniform(-10.0, 10.0);
            let output: Array = [N];

            assert_eq!(
                test_sub_kernel(a(), b(), output()) for (1, 1, 1) @ (1),
                {
                    for i in 0..output.len() {
                        output[i] = F::from_f64(a[i].into_f64() - b[i].into_f64());
                    }
                }
            );
        }

        #[test]
        fn test_mul() for F in [f32] {
            let a: Array = [N] as Uniform(-10.0, 10.0);
            let b: Array = [N] as Uniform(-10.0, 10.0);
            let output: Array = [N];

            assert_eq!(
                test_mul_kernel(a(), b(), output()) for (1, 1, 1) @ (1),
                {
                    for i in 0..output.len() {
                        output[i] = F::from_f64(a[i].into_f64() * b[i].into_f64());
                    }
                }
            );
        }
    }
}
