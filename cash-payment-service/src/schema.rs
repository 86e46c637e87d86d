diesel::table! {
    items (id) {
        id -> Int4,
        barcode -> Varchar,
        name -> Varchar,
        price -> Numeric,
        quantity -> Int4,
    }
}

diesel::table! {
    pending_cash_payments (id) {
        id -> Uuid,
        user_id -> Int4,
        code -> Nullable<Varchar>,
        cart -> Jsonb,
        status -> Varchar,
        expires_at -> Nullable<Timestamptz>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    sales_transactions (id) {
        id -> Uuid,
        user_id -> Int4,
        date -> Timestamptz,
    }
}

diesel::table! {
    sales_transaction_items (id) {
        id -> Uuid,
        transaction_id -> Uuid,
        item_id -> Int4,
        quantity -> Int4,
        price_at_sale -> Numeric,
    }
}

diesel::joinable!(sales_transaction_items -> items (item_id));
diesel::joinable!(sales_transaction_items -> sales_transactions (transaction_id));

diesel::allow_tables_to_appear_in_same_query!(
    items,
    pending_cash_payments,
    sales_transaction_items,
    sales_transactions,
);
